//! Integration tests for the historic merge pipeline on real NetCDF
//! fixtures, base + update layering included.

use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use historic::{
    CatalogConfig, MergeConfig, MergeEngine, PointExtractor, PointResult, SourceCatalog,
};
use sti_common::{GeoPoint, StiError, TargetUnits};

const BASE_NAME: &str = "ERA5_T2M_monthly_1991_2024_chile.nc";
const UPDATE_NAME: &str = "ERA5_T2M_monthly_2025_01_10_chile.nc";

const LATS: [f64; 2] = [-30.0, -30.25];
const LONS: [f64; 2] = [-71.0, -70.75];

fn month_secs(year: i32, month: u32) -> f64 {
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .unwrap()
        .timestamp() as f64
}

/// Write a `(valid_time, latitude, longitude)` t2m file in Kelvin.
fn write_t2m(path: &Path, times: &[f64], lats: &[f64], lons: &[f64], values: &[f64]) {
    assert_eq!(values.len(), times.len() * lats.len() * lons.len());

    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("valid_time", times.len()).unwrap();
    file.add_dimension("latitude", lats.len()).unwrap();
    file.add_dimension("longitude", lons.len()).unwrap();

    let mut time = file
        .add_variable::<f64>("valid_time", &["valid_time"])
        .unwrap();
    time.put_values(times, ..).unwrap();
    time.put_attribute("units", "seconds since 1970-01-01")
        .unwrap();

    let mut lat = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
    lat.put_values(lats, ..).unwrap();
    let mut lon = file
        .add_variable::<f64>("longitude", &["longitude"])
        .unwrap();
    lon.put_values(lons, ..).unwrap();

    let mut t2m = file
        .add_variable::<f64>("t2m", &["valid_time", "latitude", "longitude"])
        .unwrap();
    t2m.put_values(values, ..).unwrap();
    t2m.put_attribute("units", "K").unwrap();
}

fn engine_in(dir: &Path) -> MergeEngine {
    let catalog = SourceCatalog::new(CatalogConfig {
        dir: dir.to_path_buf(),
        ..CatalogConfig::default()
    });
    MergeEngine::new(catalog, MergeConfig::default())
}

/// Uniform value for every cell of one time slice.
fn slab(value: f64) -> Vec<f64> {
    vec![value; LATS.len() * LONS.len()]
}

#[test]
fn merge_dedupes_overlapping_months_keeping_update() {
    let dir = TempDir::new().unwrap();

    // Base carries Nov/Dec 2024 plus a stale Jan 2025
    let base_times = [
        month_secs(2024, 11),
        month_secs(2024, 12),
        month_secs(2025, 1),
    ];
    let base_values: Vec<f64> = [slab(284.0), slab(285.0), slab(999.0)].concat();
    write_t2m(&dir.path().join(BASE_NAME), &base_times, &LATS, &LONS, &base_values);

    // Update carries the corrected Jan 2025 and Feb 2025, deliberately
    // written out of order
    let update_times = [month_secs(2025, 2), month_secs(2025, 1)];
    let update_values: Vec<f64> = [slab(287.0), slab(286.0)].concat();
    write_t2m(
        &dir.path().join(UPDATE_NAME),
        &update_times,
        &LATS,
        &LONS,
        &update_values,
    );

    let ds = engine_in(dir.path()).load_merged().unwrap();
    let times = ds.times.as_ref().unwrap();

    // Ascending, duplicate-free
    assert_eq!(times.len(), 4);
    assert!(times.windows(2).all(|w| w[0] < w[1]));

    // Jan 2025 comes from the update layer, not the stale base
    assert_eq!(ds.value_at(0, 0, 0), 284.0);
    assert_eq!(ds.value_at(1, 0, 0), 285.0);
    assert_eq!(ds.value_at(2, 0, 0), 286.0);
    assert_eq!(ds.value_at(3, 0, 0), 287.0);
}

#[test]
fn merge_cache_reuses_until_a_source_changes() {
    let dir = TempDir::new().unwrap();
    write_t2m(
        &dir.path().join(BASE_NAME),
        &[month_secs(2024, 11)],
        &LATS,
        &LONS,
        &slab(284.0),
    );

    let engine = engine_in(dir.path());
    let first = engine.load_merged().unwrap();
    let second = engine.load_merged().unwrap();
    assert!(Arc::ptr_eq(&first, &second), "expected the cached dataset");

    // Touch the source: next load must recompute
    std::thread::sleep(std::time::Duration::from_millis(20));
    write_t2m(
        &dir.path().join(BASE_NAME),
        &[month_secs(2024, 11)],
        &LATS,
        &LONS,
        &slab(290.0),
    );

    let third = engine.load_merged().unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.value_at(0, 0, 0), 290.0);
}

#[test]
fn merge_fails_on_grid_mismatch() {
    let dir = TempDir::new().unwrap();
    write_t2m(
        &dir.path().join(BASE_NAME),
        &[month_secs(2024, 11)],
        &LATS,
        &LONS,
        &slab(284.0),
    );
    // Same sizes, shifted latitudes
    write_t2m(
        &dir.path().join(UPDATE_NAME),
        &[month_secs(2025, 1)],
        &[-31.0, -31.25],
        &LONS,
        &slab(286.0),
    );

    let err = engine_in(dir.path()).load_merged().unwrap_err();
    assert!(matches!(err, StiError::GridMismatch(_)), "got {:?}", err);
}

#[test]
fn merge_collapses_spurious_time_axis_first_non_missing_wins() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(BASE_NAME);

    {
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("time", 2).unwrap();
        file.add_dimension("valid_time", 1).unwrap();
        file.add_dimension("latitude", 1).unwrap();
        file.add_dimension("longitude", 2).unwrap();

        let mut time = file
            .add_variable::<f64>("valid_time", &["valid_time"])
            .unwrap();
        time.put_values(&[month_secs(2024, 11)], ..).unwrap();
        time.put_attribute("units", "seconds since 1970-01-01")
            .unwrap();

        let mut lat = file.add_variable::<f64>("latitude", &["latitude"]).unwrap();
        lat.put_values(&[-30.0], ..).unwrap();
        let mut lon = file
            .add_variable::<f64>("longitude", &["longitude"])
            .unwrap();
        lon.put_values(&[-71.0, -70.75], ..).unwrap();

        let mut t2m = file
            .add_variable::<f64>("t2m", &["time", "valid_time", "latitude", "longitude"])
            .unwrap();
        // layer 0 has a hole at cell 0; layer 1 must fill only that hole
        t2m.put_values(&[f64::NAN, 284.0, 280.0, 555.0], ..).unwrap();
        t2m.put_attribute("units", "K").unwrap();
    }

    let ds = engine_in(dir.path()).load_merged().unwrap();
    assert_eq!(ds.ntimes(), 1);
    assert_eq!(ds.value_at(0, 0, 0), 280.0);
    assert_eq!(ds.value_at(0, 0, 1), 284.0);
}

#[test]
fn merge_normalizes_0_360_longitudes() {
    let dir = TempDir::new().unwrap();
    // Columns: lon 10 carries 1.0, lon 350 carries 2.0
    write_t2m(
        &dir.path().join(BASE_NAME),
        &[month_secs(2024, 11)],
        &[-30.0],
        &[10.0, 350.0],
        &[1.0, 2.0],
    );

    let ds = engine_in(dir.path()).load_merged().unwrap();
    assert_eq!(ds.longitudes, vec![-10.0, 10.0]);
    assert_eq!(ds.value_at(0, 0, 0), 2.0);
    assert_eq!(ds.value_at(0, 0, 1), 1.0);
}

#[test]
fn empty_catalog_is_not_found() {
    let dir = TempDir::new().unwrap();
    let err = engine_in(dir.path()).load_merged().unwrap_err();
    assert!(matches!(err, StiError::NotFound(_)), "got {:?}", err);
}

#[test]
fn end_to_end_point_extraction_with_update_override() {
    let dir = TempDir::new().unwrap();

    write_t2m(
        &dir.path().join(BASE_NAME),
        &[month_secs(2024, 12), month_secs(2025, 1)],
        &LATS,
        &LONS,
        &[slab(285.0), slab(999.0)].concat(),
    );
    write_t2m(
        &dir.path().join(UPDATE_NAME),
        &[month_secs(2025, 1)],
        &LATS,
        &LONS,
        &slab(286.0),
    );

    let extractor = PointExtractor::new(Arc::new(engine_in(dir.path())));
    let results = extractor
        .extract(&[GeoPoint { lat: -30.0, lon: -71.0 }], TargetUnits::Celsius)
        .unwrap();
    assert_eq!(results.len(), 1);

    let series = match &results[0] {
        PointResult::Series(s) => s,
        PointResult::Error(e) => panic!("expected series, got error: {}", e.error),
    };
    assert_eq!(series.variable, "t2m");
    assert_eq!(series.units, "C");
    assert_eq!(series.lat_used, -30.0);
    assert_eq!(series.lon_used, -71.0);

    assert_eq!(series.series.len(), 2);
    assert_eq!(series.series[0].date, "2024-12-01");
    assert_eq!(series.series[1].date, "2025-01-01");
    let dec = series.series[0].value.unwrap();
    let jan = series.series[1].value.unwrap();
    assert!((dec - (285.0 - 273.15)).abs() < 1e-3);
    // Jan comes from the update, converted to Celsius
    assert!((jan - (286.0 - 273.15)).abs() < 1e-3);
}
