pub mod config;
pub mod error;
pub mod fingerprint;
pub mod text;
pub mod types;

pub use config::Config;
pub use error::ScanError;
pub use fingerprint::{listing_fingerprint, sha256_hex};
pub use text::*;
pub use types::*;
