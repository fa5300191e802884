//! Guarded NetCDF access for the STI data services.
//!
//! The underlying libnetcdf/HDF5 stack is not safe under concurrent
//! handle creation or concurrent first-read of the same file. Every
//! open, probe and value materialization in this crate runs under one
//! process-wide lock ([`with_hdf5_lock`]); all read functions return
//! fully materialized data so no handle ever outlives its guarded
//! section. Purely in-memory reads of the returned data need no lock.

pub mod cftime;
pub mod hdf5_lock;
pub mod reader;
pub mod resolve;

pub use cftime::decode_cf_times;
pub use hdf5_lock::{silence_hdf5_errors, with_hdf5_lock};
pub use reader::{probe_file, read_field, read_grid, Coord, CoordValues, RawField};
pub use resolve::{resolve_variable, VariableResolution};
