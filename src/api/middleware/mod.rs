pub mod admin;
pub mod metrics;
pub mod request_id;
