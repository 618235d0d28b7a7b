#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod provider;
pub mod sender;
pub mod store;
pub mod transport;
pub mod types;

pub use sender::TelemetrySender;

pub type Result<T> = std::result::Result<T, error::Error>;
