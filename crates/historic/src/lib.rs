//! Historic monthly temperature pipeline.
//!
//! Layered ERA5 NetCDF files (a multi-decade base plus small update
//! files) are canonicalized and merged into one deduplicated time
//! series, cached by source-file signature, and queried with
//! tolerance-checked nearest-neighbor point extraction.

pub mod catalog;
pub mod extract;
pub mod merge;

pub use catalog::{CatalogConfig, MergeSignature, SourceCatalog, SourceDescriptor};
pub use extract::{
    extract_from, NearestGrid, PointError, PointExtractor, PointResult, PointSeries, SeriesEntry,
    MAX_POINTS,
};
pub use merge::{MergeConfig, MergeEngine};
