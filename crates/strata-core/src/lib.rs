pub mod config;
pub mod error;
pub mod keyring;

pub use error::{StrataError, StrataResult};
pub use keyring::KeyRing;

/// 1 MiB, the unit most thresholds are expressed in
pub const MIB: u64 = 1024 * 1024;
