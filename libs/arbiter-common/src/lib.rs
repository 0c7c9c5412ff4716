pub mod config;
pub mod redis;
pub mod status;
pub mod types;
pub mod units;

pub use status::Status;
