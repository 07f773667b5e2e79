//! Two-tier result cache
//!
//! Results are addressed by [`CacheKey`], derived from the producing agent
//! kind, canonical task parameters and the content fingerprint of the input.
//! [`CacheManager::get_or_compute`] is the read-through used by agents; it
//! coalesces concurrent computations of the same key.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod entry;
pub mod error;
pub mod key;
pub mod manager;
pub mod store;

pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::CacheError;
pub use key::CacheKey;
pub use manager::{CacheManager, CacheStats};
pub use store::{DurableStore, FsStore, NullStore};
