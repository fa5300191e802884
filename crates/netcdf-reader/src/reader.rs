//! Eager, guarded reads of NetCDF files.
//!
//! Every function here acquires the process-wide HDF5 lock, does all
//! of its libnetcdf work inside it, and returns owned data. Values are
//! unpacked (`scale_factor`/`add_offset` applied) and fill values are
//! mapped to NaN before anything leaves the guarded section.

use std::path::Path;

use chrono::{DateTime, Utc};

use sti_common::{Dataset, StiError, StiResult};

use crate::cftime::decode_cf_times;
use crate::hdf5_lock::{silence_hdf5_errors, with_hdf5_lock};
use crate::resolve::{resolve_variable, VariableResolution};

/// Coordinate values for one dimension of a raw field.
#[derive(Debug, Clone)]
pub enum CoordValues {
    Numeric(Vec<f64>),
    Time(Vec<DateTime<Utc>>),
}

/// A named coordinate vector read alongside a field.
#[derive(Debug, Clone)]
pub struct Coord {
    pub name: String,
    pub values: CoordValues,
}

/// A variable read exactly as stored: dimension order untouched, no
/// canonicalization. The historic merge pipeline normalizes these.
#[derive(Debug, Clone)]
pub struct RawField {
    /// On-disk variable name (after resolution policy)
    pub name: String,
    /// `units` attribute, if present
    pub units: Option<String>,
    /// Dimensions in storage order
    pub dims: Vec<(String, usize)>,
    /// Unpacked values, row-major in storage order, NaN = missing
    pub values: Vec<f32>,
    /// Coordinate vectors for dims that have a coordinate variable
    pub coords: Vec<Coord>,
}

impl RawField {
    /// Coordinate vector by dimension name, if one was stored.
    pub fn coord(&self, name: &str) -> Option<&CoordValues> {
        self.coords
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.values)
    }
}

/// Open-and-drop integrity probe.
///
/// A file that fails this is unreadable at the format level (truncated
/// download, partial write) and must be discarded by the caller.
pub fn probe_file(path: &Path) -> StiResult<()> {
    silence_hdf5_errors();
    with_hdf5_lock(|| match netcdf::open(path) {
        Ok(_) => Ok(()),
        Err(e) => Err(StiError::DataReadError(format!(
            "Failed to open {}: {}",
            path.display(),
            e
        ))),
    })
}

/// Read a 2-D lat/lon field, eagerly, under the HDF5 lock.
///
/// The payload variable is resolved via [`resolve_variable`] and the
/// returned dataset always carries the canonical `preferred` name, no
/// matter what the file called it. Leading length-1 dimensions (a
/// degenerate time axis on a single forecast step) are squeezed.
pub fn read_grid(path: &Path, preferred: &str) -> StiResult<Dataset> {
    silence_hdf5_errors();
    with_hdf5_lock(|| {
        let file = open(path)?;

        let name = resolve_in(&file, preferred)?;
        let var = file
            .variable(&name)
            .ok_or_else(|| StiError::DataReadError(format!("variable '{}' vanished", name)))?;

        let dims: Vec<(String, usize)> = var
            .dimensions()
            .iter()
            .map(|d| (d.name(), d.len()))
            .collect();

        let mut lead = 0;
        while dims.len() - lead > 2 && dims[lead].1 == 1 {
            lead += 1;
        }
        let spatial = &dims[lead..];
        if spatial.len() != 2 {
            return Err(StiError::DataReadError(format!(
                "'{}' is not a 2-D grid: dims {:?}",
                name, dims
            )));
        }
        let (lat_dim, lon_dim) = (&spatial[0].0, &spatial[1].0);
        if !matches!(lat_dim.as_str(), "latitude" | "lat")
            || !matches!(lon_dim.as_str(), "longitude" | "lon")
        {
            return Err(StiError::DataReadError(format!(
                "'{}' has unexpected spatial dims ({}, {})",
                name, lat_dim, lon_dim
            )));
        }

        let latitudes = read_coord_f64(&file, lat_dim)?;
        let longitudes = read_coord_f64(&file, lon_dim)?;

        let raw: Vec<f64> = var.get_values(..).map_err(|e| {
            StiError::DataReadError(format!("Failed to read '{}': {}", name, e))
        })?;
        let values = unpack(&raw, &var);

        Ok(Dataset {
            variable: preferred.to_string(),
            units: get_str_attr(&var, "units"),
            latitudes,
            longitudes,
            times: None,
            values,
        })
    })
}

/// Read a variable and its per-dimension coordinates as stored.
///
/// Coordinate variables whose `units` carry a `" since "` clause are
/// decoded to UTC timestamps; everything else stays numeric.
pub fn read_field(path: &Path, preferred: &str) -> StiResult<RawField> {
    silence_hdf5_errors();
    with_hdf5_lock(|| {
        let file = open(path)?;

        let name = resolve_in(&file, preferred)?;
        let var = file
            .variable(&name)
            .ok_or_else(|| StiError::DataReadError(format!("variable '{}' vanished", name)))?;

        let dims: Vec<(String, usize)> = var
            .dimensions()
            .iter()
            .map(|d| (d.name(), d.len()))
            .collect();

        let raw: Vec<f64> = var.get_values(..).map_err(|e| {
            StiError::DataReadError(format!("Failed to read '{}': {}", name, e))
        })?;
        let values = unpack(&raw, &var);
        let units = get_str_attr(&var, "units");

        let mut coords = Vec::new();
        for (dim_name, _) in &dims {
            let Some(cvar) = file.variable(dim_name) else {
                continue;
            };
            if cvar.dimensions().len() != 1 {
                continue;
            }
            let craw: Vec<f64> = cvar.get_values(..).map_err(|e| {
                StiError::DataReadError(format!("Failed to read coord '{}': {}", dim_name, e))
            })?;
            let values = match get_str_attr(&cvar, "units") {
                Some(u) if u.contains(" since ") => CoordValues::Time(decode_cf_times(&craw, &u)?),
                _ => CoordValues::Numeric(craw),
            };
            coords.push(Coord {
                name: dim_name.clone(),
                values,
            });
        }

        Ok(RawField {
            name,
            units,
            dims,
            values,
            coords,
        })
    })
}

fn open(path: &Path) -> StiResult<netcdf::File> {
    netcdf::open(path).map_err(|e| {
        StiError::DataReadError(format!("Failed to open {}: {}", path.display(), e))
    })
}

fn resolve_in(file: &netcdf::File, preferred: &str) -> StiResult<String> {
    let dim_names: Vec<String> = file.dimensions().map(|d| d.name()).collect();
    let candidates: Vec<String> = file
        .variables()
        .map(|v| v.name())
        .filter(|n| !dim_names.contains(n))
        .collect();

    match resolve_variable(preferred, &candidates) {
        VariableResolution::Resolved(name) => Ok(name),
        VariableResolution::Missing {
            preferred,
            candidates,
        } => Err(StiError::VariableMissing {
            preferred,
            candidates,
        }),
    }
}

fn read_coord_f64(file: &netcdf::File, name: &str) -> StiResult<Vec<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| StiError::DataReadError(format!("missing coordinate variable '{}'", name)))?;
    var.get_values(..)
        .map_err(|e| StiError::DataReadError(format!("Failed to read coord '{}': {}", name, e)))
}

/// Apply scale/offset and map fill values to NaN.
fn unpack(raw: &[f64], var: &netcdf::Variable) -> Vec<f32> {
    let scale = get_f64_attr(var, "scale_factor").unwrap_or(1.0);
    let offset = get_f64_attr(var, "add_offset").unwrap_or(0.0);
    let fill = get_f64_attr(var, "_FillValue");
    let missing = get_f64_attr(var, "missing_value");

    raw.iter()
        .map(|&v| {
            if v.is_nan() || fill == Some(v) || missing == Some(v) {
                f32::NAN
            } else {
                (v * scale + offset) as f32
            }
        })
        .collect()
}

/// Check if a variable has an attribute with the given name.
/// This avoids HDF5 error spam when checking for optional attributes.
fn has_attr(var: &netcdf::Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &netcdf::Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let attr_value = var.attribute_value(name)?.ok()?;
    f64::try_from(attr_value).ok()
}

fn get_str_attr(var: &netcdf::Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        netcdf::AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}
