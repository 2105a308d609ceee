//! Strata Common
//!
//! Foundation types shared by every Strata crate:
//! - [`ContentHash`]: Blake3 digest used for content addressing
//! - [`PathPattern`]: glob matcher for exclude lists and cache invalidation
//! - [`serde_ms`]: millisecond encoding for configuration durations

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod hash;
pub mod pattern;
pub mod serde_ms;

pub use hash::{ContentHash, HashError};
pub use pattern::{PathPattern, PatternError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
