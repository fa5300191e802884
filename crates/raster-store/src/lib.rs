//! Remote object access and the on-disk raster cache.
//!
//! Provides:
//! - S3-compatible object storage access (exists / download / prefix
//!   listing) for the STI index bucket
//! - run/step key mapping between `RasterKey` identities, object keys
//!   and local cache filenames
//! - the multi-process-safe fetch-once cache for per-(run, step)
//!   NetCDF rasters

pub mod cache;
pub mod key;
pub mod listing;
pub mod object_store;

pub use self::object_store::{ObjectStorage, ObjectStorageConfig};
pub use cache::{RasterCache, RasterCacheConfig};
pub use key::{RasterKey, RemoteLayout};
pub use listing::{list_runs, list_steps};
