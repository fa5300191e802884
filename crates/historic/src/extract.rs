//! Nearest-neighbor point extraction from the merged dataset.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use sti_common::{Dataset, GeoPoint, StiError, StiResult, TargetUnits};

use crate::merge::MergeEngine;

/// Maximum number of points accepted in one extraction batch.
pub const MAX_POINTS: usize = 200;

const KELVIN_OFFSET: f64 = 273.15;

/// Per-point extraction outcome. Serializes to either the series
/// payload or the error payload, matching the API contract.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PointResult {
    Series(PointSeries),
    Error(PointError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PointSeries {
    pub lat_requested: f64,
    pub lon_requested: f64,
    pub lat_used: f64,
    pub lon_used: f64,
    pub variable: String,
    pub units: String,
    pub series: Vec<SeriesEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesEntry {
    /// YYYY-MM-DD
    pub date: String,
    /// Missing samples stay null, never zero
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PointError {
    pub lat_requested: f64,
    pub lon_requested: f64,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nearest_grid: Option<NearestGrid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NearestGrid {
    pub lat: f64,
    pub lon: f64,
}

/// Extracts time series for query points from the merged dataset.
pub struct PointExtractor {
    engine: Arc<MergeEngine>,
}

impl PointExtractor {
    pub fn new(engine: Arc<MergeEngine>) -> Self {
        Self { engine }
    }

    /// Extract one series per point, in `units`.
    ///
    /// A batch larger than [`MAX_POINTS`] is rejected whole, before
    /// any merge work; a bad point only fails its own entry.
    pub fn extract(
        &self,
        points: &[GeoPoint],
        units: TargetUnits,
    ) -> StiResult<Vec<PointResult>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        check_batch_size(points)?;
        let dataset = self.engine.load_merged()?;
        extract_from(&dataset, points, units)
    }
}

fn check_batch_size(points: &[GeoPoint]) -> StiResult<()> {
    if points.len() > MAX_POINTS {
        return Err(StiError::InvalidInput(format!(
            "too many points requested, max is {}",
            MAX_POINTS
        )));
    }
    Ok(())
}

/// Extraction against an already-merged dataset.
pub fn extract_from(
    dataset: &Dataset,
    points: &[GeoPoint],
    units: TargetUnits,
) -> StiResult<Vec<PointResult>> {
    check_batch_size(points)?;

    let dataset_is_360 = dataset.longitudes.iter().any(|&l| l > 180.0);
    // Slightly over half a cell: tolerant of float jitter, still
    // rejecting far-away matches.
    let tol_lat = 0.6 * median_spacing(&dataset.latitudes);
    let tol_lon = 0.6 * median_spacing(&dataset.longitudes);

    let kelvin_source = dataset
        .units
        .as_deref()
        .map_or(false, |u| u.contains('K') || u.to_lowercase().contains("kelvin"));

    let dates: Vec<String> = dataset
        .times
        .as_ref()
        .map(|ts| ts.iter().map(|t| t.format("%Y-%m-%d").to_string()).collect())
        .unwrap_or_default();

    debug!(
        points = points.len(),
        dataset_is_360 = dataset_is_360,
        tol_lat = tol_lat,
        tol_lon = tol_lon,
        "extracting point series"
    );

    Ok(points
        .iter()
        .map(|pt| {
            extract_point(
                dataset,
                pt,
                units,
                dataset_is_360,
                tol_lat,
                tol_lon,
                kelvin_source,
                &dates,
            )
        })
        .collect())
}

#[allow(clippy::too_many_arguments)]
fn extract_point(
    dataset: &Dataset,
    pt: &GeoPoint,
    units: TargetUnits,
    dataset_is_360: bool,
    tol_lat: f64,
    tol_lon: f64,
    kelvin_source: bool,
    dates: &[String],
) -> PointResult {
    if !(-90.0..=90.0).contains(&pt.lat) {
        return PointResult::Error(PointError {
            lat_requested: pt.lat,
            lon_requested: pt.lon,
            error: "Invalid latitude".to_string(),
            nearest_grid: None,
        });
    }

    let norm_lon = normalize_longitude(pt.lon, dataset_is_360);

    let i_lat = nearest_index(&dataset.latitudes, pt.lat);
    let j_lon = nearest_index(&dataset.longitudes, norm_lon);
    let found_lat = dataset.latitudes[i_lat];
    let found_lon = dataset.longitudes[j_lon];

    let diff_lat = (found_lat - pt.lat).abs();
    let mut diff_lon = (found_lon - norm_lon).abs();
    if diff_lon > 180.0 {
        diff_lon = 360.0 - diff_lon;
    }

    if diff_lat > tol_lat || diff_lon > tol_lon {
        return PointResult::Error(PointError {
            lat_requested: pt.lat,
            lon_requested: pt.lon,
            error: "Point out of bounds (no grid cell near enough)".to_string(),
            nearest_grid: Some(NearestGrid {
                lat: found_lat,
                lon: found_lon,
            }),
        });
    }

    let convert_to_celsius = kelvin_source && units == TargetUnits::Celsius;
    let series = dataset
        .series_at(i_lat, j_lon)
        .into_iter()
        .zip(dates.iter())
        .map(|(v, date)| SeriesEntry {
            date: date.clone(),
            value: if v.is_nan() {
                None
            } else if convert_to_celsius {
                Some(v as f64 - KELVIN_OFFSET)
            } else {
                Some(v as f64)
            },
        })
        .collect();

    PointResult::Series(PointSeries {
        lat_requested: pt.lat,
        lon_requested: pt.lon,
        lat_used: found_lat,
        lon_used: found_lon,
        variable: dataset.variable.clone(),
        units: units.as_str().to_string(),
        series,
    })
}

/// Normalize a query longitude to the dataset's convention.
fn normalize_longitude(lon: f64, dataset_is_360: bool) -> f64 {
    if dataset_is_360 {
        lon.rem_euclid(360.0)
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Index of the axis value closest to `target` (plain absolute
/// distance; the axis need not be sorted).
fn nearest_index(axis: &[f64], target: f64) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &v) in axis.iter().enumerate() {
        let dist = (v - target).abs();
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

/// Median absolute spacing between neighboring axis values. NaN for an
/// axis with fewer than two values, which disables the tolerance check.
fn median_spacing(axis: &[f64]) -> f64 {
    let mut diffs: Vec<f64> = axis.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    if diffs.is_empty() {
        return f64::NAN;
    }
    diffs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = diffs.len() / 2;
    if diffs.len() % 2 == 1 {
        diffs[mid]
    } else {
        (diffs[mid - 1] + diffs[mid]) / 2.0
    }
}
