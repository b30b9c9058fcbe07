use anyhow::{Result, anyhow};
use std::path::{Component, Path, PathBuf};

pub const MAX_FILENAME_LENGTH: usize = 255;

#[derive(Debug)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Reduce a client-supplied file name to a single safe path component.
pub fn sanitize_filename(filename: &str) -> Result<String> {
    // Reject anything that tries to address another directory
    if filename.contains('/') || filename.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", filename);
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename must not contain path separators".to_string(),
        }));
    }

    let name = filename.trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(anyhow!(ValidationError {
            code: "INVALID_FILENAME",
            message: "Filename cannot be empty".to_string(),
        }));
    }

    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_control()
                || c == ':'
                || c == '*'
                || c == '?'
                || c == '"'
                || c == '<'
                || c == '>'
                || c == '|'
            {
                '_'
            } else {
                c
            }
        })
        .collect();

    if sanitized.len() > MAX_FILENAME_LENGTH {
        return Err(anyhow!(ValidationError {
            code: "FILENAME_TOO_LONG",
            message: format!("Filename exceeds {} bytes", MAX_FILENAME_LENGTH),
        }));
    }

    Ok(sanitized)
}

/// Session tokens double as staging directory names.
pub fn is_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 128
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Validate a destination path taken from a session record. It must stay
/// below the share root: no absolute prefix, no `..`.
pub fn sanitize_destination_path(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim().trim_start_matches(['/', '\\']);
    let mut clean = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!(ValidationError {
                    code: "INVALID_DESTINATION",
                    message: format!("Destination path escapes the share root: {}", path),
                }));
            }
        }
    }

    Ok(clean)
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
pub fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split `report.pdf` into (`report`, `.pdf`). Dotfiles keep their leading dot in the stem.
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}
