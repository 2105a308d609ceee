//! Strata Cache
//!
//! Content-addressed memoization of per-(file, scope, target) results.
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_cache::ContentCache;
//!
//! # async fn example() -> Result<(), strata_cache::CacheError> {
//! let cache = ContentCache::default();
//! cache.store("src/app.py", "modify", "src/app.py::main", serde_json::json!("done")).await?;
//! let hit = cache.lookup("src/app.py", "modify", "src/app.py::main").await?;
//! assert!(hit.is_some());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod entry;
pub mod error;

pub use cache::{CacheConfig, CacheStatistics, ContentCache};
pub use entry::{CacheEntry, CacheHit, CacheKey};
pub use error::CacheError;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
