pub mod config;
pub mod crypto;
pub mod executor;
pub mod scheduler;
pub mod session_cache;
pub mod vault;
