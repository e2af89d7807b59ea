pub mod cli;
pub mod config;
pub mod error;
pub mod period;
pub mod regen;
pub mod server;
pub mod storage;
pub mod utils;

pub use crate::config::Config;
pub use crate::error::{RegenError, Result};
