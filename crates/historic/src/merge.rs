//! Canonicalize and merge layered historic sources.
//!
//! Sources arrive in catalog order (base first, updates after) with
//! real-world inconsistencies: aliased coordinate names, a spurious
//! extra temporal axis, 0..360 longitudes. Each source is normalized
//! to `(valid_time, latitude ascending-as-stored, longitude sorted
//! [-180,180))`, then all are concatenated along time with an exact
//! spatial-grid match and deduplicated keeping the later-listed
//! source's slice.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, info, warn};

use netcdf_reader::{read_field, CoordValues, RawField};
use sti_common::{Dataset, StiError, StiResult};

use crate::catalog::{MergeSignature, SourceCatalog, SourceDescriptor};

/// Merged datasets kept in memory, keyed by source signatures.
const MERGE_CACHE_CAPACITY: usize = 2;

/// Configuration for the merge pipeline.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Canonical payload variable (e.g. "t2m")
    pub variable: String,
    /// Official temporal axis name
    pub time_dim: String,
    /// Tolerated fallback temporal axis name
    pub time_dim_fallback: String,
    /// Merged footprints above this are logged as oversized
    pub eager_load_bytes_threshold: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            variable: "t2m".to_string(),
            time_dim: "valid_time".to_string(),
            time_dim_fallback: "time".to_string(),
            eager_load_bytes_threshold: 256 * 1024 * 1024,
        }
    }
}

/// One source after canonicalization, ready to concatenate.
struct CanonicalSource {
    name: String,
    units: Option<String>,
    times: Vec<DateTime<Utc>>,
    lats: Vec<f64>,
    lons: Vec<f64>,
    /// `[time, lat, lon]` row-major
    values: Vec<f32>,
}

/// Builds and caches the merged historic dataset.
pub struct MergeEngine {
    catalog: SourceCatalog,
    config: MergeConfig,
    cache: Mutex<LruCache<MergeSignature, Arc<Dataset>>>,
}

impl MergeEngine {
    pub fn new(catalog: SourceCatalog, config: MergeConfig) -> Self {
        Self {
            catalog,
            config,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(MERGE_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    /// Return the merged dataset, reusing the cached copy while every
    /// source file's `(name, mtime, size)` signature is unchanged.
    ///
    /// The mutex only covers cache lookup/insert; concurrent misses on
    /// the same signature may each run the merge once, and the last
    /// insert wins.
    pub fn load_merged(&self) -> StiResult<Arc<Dataset>> {
        let sources = self.catalog.ordered_sources()?;
        if sources.is_empty() {
            return Err(StiError::NotFound(format!(
                "no historic NetCDF files found in '{}'",
                self.catalog.dir().display()
            )));
        }

        let signature = MergeSignature::of(&sources);

        if let Some(ds) = self.lock_cache().get(&signature) {
            debug!("merge cache hit");
            return Ok(ds.clone());
        }

        let dataset = Arc::new(self.merge_sources(&sources)?);
        self.lock_cache().put(signature, dataset.clone());
        Ok(dataset)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<MergeSignature, Arc<Dataset>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn merge_sources(&self, sources: &[SourceDescriptor]) -> StiResult<Dataset> {
        let mut canonical = Vec::with_capacity(sources.len());
        for source in sources {
            let field = read_field(&source.path, &self.config.variable)?;
            let canon = self.canonicalize(&source.name, field)?;
            info!(
                source = %canon.name,
                steps = canon.times.len(),
                lon_min = canon.lons.first().copied().unwrap_or(f64::NAN),
                lon_max = canon.lons.last().copied().unwrap_or(f64::NAN),
                "canonicalized historic source"
            );
            canonical.push(canon);
        }

        self.concat(canonical)
    }

    /// Normalize one raw field to `(time, lat, lon)` with sorted
    /// [-180,180) longitudes and an ascending time axis.
    fn canonicalize(&self, source: &str, field: RawField) -> StiResult<CanonicalSource> {
        let dim_names: Vec<&str> = field.dims.iter().map(|(n, _)| n.as_str()).collect();

        let lat_name = pick_dim(&dim_names, &["latitude", "lat"]).ok_or_else(|| {
            StiError::DataReadError(format!("{}: no latitude dimension in {:?}", source, dim_names))
        })?;
        let lon_name = pick_dim(&dim_names, &["longitude", "lon"]).ok_or_else(|| {
            StiError::DataReadError(format!("{}: no longitude dimension in {:?}", source, dim_names))
        })?;
        let time_name = pick_dim(
            &dim_names,
            &[
                self.config.time_dim.as_str(),
                self.config.time_dim_fallback.as_str(),
            ],
        )
        .ok_or_else(|| {
            StiError::DataReadError(format!(
                "'{}' has no '{}' dim in {}. dims={:?}",
                field.name, self.config.time_dim, source, dim_names
            ))
        })?;

        let lats = numeric_coord(&field, &lat_name, source)?;
        let lons = numeric_coord(&field, &lon_name, source)?;
        let times = match field.coord(&time_name) {
            Some(CoordValues::Time(t)) => t.clone(),
            _ => {
                return Err(StiError::DataReadError(format!(
                    "{}: time coordinate '{}' is missing or not CF-decodable",
                    source, time_name
                )));
            }
        };

        let (ntimes, nlat, nlon) = (times.len(), lats.len(), lons.len());
        let slice_len = nlat * nlon;
        let block_len = ntimes * slice_len;

        // Some update files carry a leftover packing axis `time` in
        // front of the real temporal axis; collapse it layer by layer,
        // each later layer filling only cells still undefined.
        let expected_collapsed = [time_name.as_str(), lat_name.as_str(), lon_name.as_str()];
        let values = if dim_names == expected_collapsed {
            field.values
        } else if dim_names.len() == 4
            && dim_names[0] == "time"
            && dim_names[1..] == expected_collapsed
        {
            let layers = field.dims[0].1;
            debug!(source = source, layers = layers, "collapsing spurious 'time' axis");
            let mut merged = field.values[..block_len].to_vec();
            for layer in 1..layers {
                let offset = layer * block_len;
                for (i, slot) in merged.iter_mut().enumerate() {
                    if slot.is_nan() {
                        *slot = field.values[offset + i];
                    }
                }
            }
            merged
        } else {
            return Err(StiError::DataReadError(format!(
                "{}: unexpected dimension layout {:?} for '{}'",
                source, dim_names, field.name
            )));
        };

        let (lons, values) = normalize_longitudes(source, lons, values, ntimes, nlat);
        let (times, values) = sort_by_time(times, values, slice_len);

        Ok(CanonicalSource {
            name: source.to_string(),
            units: field.units,
            times,
            lats,
            lons,
            values,
        })
    }

    /// Concatenate along time with an exact spatial join, then sort
    /// and dedupe the combined axis keeping later-listed sources.
    fn concat(&self, sources: Vec<CanonicalSource>) -> StiResult<Dataset> {
        let first = &sources[0];
        for other in &sources[1..] {
            if other.lats.len() != first.lats.len() || other.lons.len() != first.lons.len() {
                return Err(StiError::GridMismatch(format!(
                    "{} is {}x{} but {} is {}x{}",
                    first.name,
                    first.lats.len(),
                    first.lons.len(),
                    other.name,
                    other.lats.len(),
                    other.lons.len()
                )));
            }
            if other.lats != first.lats || other.lons != first.lons {
                return Err(StiError::GridMismatch(format!(
                    "{} and {} have identical grid sizes but different coordinates",
                    first.name, other.name
                )));
            }
        }

        let slice_len = first.lats.len() * first.lons.len();

        // (time, source index, slice index); stable sort keeps catalog
        // order inside equal timestamps, so the last entry of a run of
        // duplicates is the later-listed source.
        let mut entries: Vec<(DateTime<Utc>, usize, usize)> = Vec::new();
        for (si, source) in sources.iter().enumerate() {
            for (ti, time) in source.times.iter().enumerate() {
                entries.push((*time, si, ti));
            }
        }
        entries.sort_by_key(|e| e.0);

        let mut kept: Vec<(DateTime<Utc>, usize, usize)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match kept.last_mut() {
                Some(last) if last.0 == entry.0 => *last = entry,
                _ => kept.push(entry),
            }
        }

        if kept.is_empty() {
            return Err(StiError::DataReadError(
                "merged dataset has an empty time axis".to_string(),
            ));
        }

        let estimated = kept.len() * slice_len * std::mem::size_of::<f32>();
        if estimated > self.config.eager_load_bytes_threshold {
            warn!(
                estimated_bytes = estimated,
                threshold = self.config.eager_load_bytes_threshold,
                "merged dataset exceeds the configured footprint threshold"
            );
        }

        let mut times = Vec::with_capacity(kept.len());
        let mut values = Vec::with_capacity(kept.len() * slice_len);
        for (time, si, ti) in kept {
            times.push(time);
            let start = ti * slice_len;
            values.extend_from_slice(&sources[si].values[start..start + slice_len]);
        }

        info!(
            sources = sources.len(),
            steps = times.len(),
            bytes = values.len() * std::mem::size_of::<f32>(),
            "merged historic dataset"
        );

        Ok(Dataset {
            variable: self.config.variable.clone(),
            units: first.units.clone(),
            latitudes: first.lats.clone(),
            longitudes: first.lons.clone(),
            times: Some(times),
            values,
        })
    }
}

fn pick_dim(dims: &[&str], accepted: &[&str]) -> Option<String> {
    accepted
        .iter()
        .find(|&&a| dims.contains(&a))
        .map(|&a| a.to_string())
}

fn numeric_coord(field: &RawField, name: &str, source: &str) -> StiResult<Vec<f64>> {
    match field.coord(name) {
        Some(CoordValues::Numeric(v)) => Ok(v.clone()),
        _ => Err(StiError::DataReadError(format!(
            "{}: missing numeric coordinate '{}'",
            source, name
        ))),
    }
}

/// Convert 0..360 longitudes to [-180,180), then always sort ascending
/// (reordering value columns) so vectors compare file-to-file.
fn normalize_longitudes(
    source: &str,
    lons: Vec<f64>,
    values: Vec<f32>,
    ntimes: usize,
    nlat: usize,
) -> (Vec<f64>, Vec<f32>) {
    let lon_max = lons.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let lons: Vec<f64> = if lon_max > 180.0 {
        warn!(
            source = source,
            lon_max = lon_max,
            "converting longitude 0..360 -> -180..180"
        );
        lons.iter()
            .map(|l| (l + 180.0).rem_euclid(360.0) - 180.0)
            .collect()
    } else {
        lons
    };

    let nlon = lons.len();
    let mut order: Vec<usize> = (0..nlon).collect();
    order.sort_by(|&a, &b| lons[a].partial_cmp(&lons[b]).unwrap_or(std::cmp::Ordering::Equal));

    if order.iter().enumerate().all(|(i, &o)| i == o) {
        return (lons, values);
    }

    let sorted_lons: Vec<f64> = order.iter().map(|&o| lons[o]).collect();
    let mut sorted_values = vec![0.0f32; values.len()];
    for t in 0..ntimes {
        for i in 0..nlat {
            let row = (t * nlat + i) * nlon;
            for (j, &o) in order.iter().enumerate() {
                sorted_values[row + j] = values[row + o];
            }
        }
    }

    (sorted_lons, sorted_values)
}

/// Sort time slices ascending by their coordinate (stable).
fn sort_by_time(
    times: Vec<DateTime<Utc>>,
    values: Vec<f32>,
    slice_len: usize,
) -> (Vec<DateTime<Utc>>, Vec<f32>) {
    let mut order: Vec<usize> = (0..times.len()).collect();
    order.sort_by_key(|&i| times[i]);

    if order.iter().enumerate().all(|(i, &o)| i == o) {
        return (times, values);
    }

    let sorted_times: Vec<DateTime<Utc>> = order.iter().map(|&o| times[o]).collect();
    let mut sorted_values = Vec::with_capacity(values.len());
    for &o in &order {
        let start = o * slice_len;
        sorted_values.extend_from_slice(&values[start..start + slice_len]);
    }

    (sorted_times, sorted_values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_longitudes_wraps_and_reorders_columns() {
        // lons (10, 350) -> (10, -10) -> sorted (-10, 10), columns swap
        let (lons, values) = normalize_longitudes(
            "test.nc",
            vec![10.0, 350.0],
            vec![1.0, 2.0, 3.0, 4.0],
            1,
            2,
        );
        assert_eq!(lons, vec![-10.0, 10.0]);
        assert_eq!(values, vec![2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_normalize_longitudes_identity_when_sorted() {
        let (lons, values) =
            normalize_longitudes("test.nc", vec![-71.0, -70.0], vec![1.0, 2.0], 1, 1);
        assert_eq!(lons, vec![-71.0, -70.0]);
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_sort_by_time_reorders_slices() {
        use chrono::TimeZone;
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let (times, values) = sort_by_time(vec![t1, t0], vec![9.0, 9.5, 1.0, 1.5], 2);
        assert_eq!(times, vec![t0, t1]);
        assert_eq!(values, vec![1.0, 1.5, 9.0, 9.5]);
    }
}
