pub use super::upload_links::Entity as UploadLinks;
