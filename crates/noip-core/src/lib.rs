//! `noip-core`: configuration and error types shared by the No-IP updater crates.

pub mod config;
pub mod credential;
pub mod error;

pub use config::NoipConfig;
pub use error::{NoipError, Result};
