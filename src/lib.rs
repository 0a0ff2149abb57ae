#![forbid(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod mode;
pub mod models;
pub mod worker;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
