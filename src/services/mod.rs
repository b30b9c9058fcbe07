pub mod access_gate;
pub mod chunk_receiver;
pub mod error;
pub mod handoff;
pub mod janitor;
pub mod reassembly;
pub mod session_cache;
pub mod staging;
pub mod storage;
