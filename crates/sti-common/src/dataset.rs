//! In-memory dataset model for gridded values and time series.

use chrono::{DateTime, Utc};

/// A fully materialized raster or time-series dataset.
///
/// Values are row-major with latitude as the slow axis and longitude as
/// the fast axis; a 3-D dataset adds time as the slowest axis. Missing
/// samples are `f32::NAN`. There is never a backing file handle: once a
/// `Dataset` exists it can be read from any thread without locking.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Canonical variable name (e.g. "sti", "t2m")
    pub variable: String,
    /// Source unit metadata, if the file carried any (e.g. "K")
    pub units: Option<String>,
    /// 1-D latitude coordinate vector
    pub latitudes: Vec<f64>,
    /// 1-D longitude coordinate vector
    pub longitudes: Vec<f64>,
    /// Time axis for historic series; `None` for single-slice rasters.
    /// When present: strictly ascending, duplicate-free.
    pub times: Option<Vec<DateTime<Utc>>>,
    /// Value array, `[time?, lat, lon]` row-major
    pub values: Vec<f32>,
}

impl Dataset {
    pub fn nlat(&self) -> usize {
        self.latitudes.len()
    }

    pub fn nlon(&self) -> usize {
        self.longitudes.len()
    }

    /// Number of time slices (1 for a plain raster).
    pub fn ntimes(&self) -> usize {
        self.times.as_ref().map_or(1, Vec::len)
    }

    /// Value at `(time, lat, lon)` indices.
    pub fn value_at(&self, t: usize, i_lat: usize, j_lon: usize) -> f32 {
        self.values[(t * self.nlat() + i_lat) * self.nlon() + j_lon]
    }

    /// Value at `(lat, lon)` of the first (or only) time slice.
    pub fn grid_value(&self, i_lat: usize, j_lon: usize) -> f32 {
        self.value_at(0, i_lat, j_lon)
    }

    /// Full time series for one grid cell, in time-axis order.
    pub fn series_at(&self, i_lat: usize, j_lon: usize) -> Vec<f32> {
        (0..self.ntimes())
            .map(|t| self.value_at(t, i_lat, j_lon))
            .collect()
    }

    /// Flatten the first time slice into parallel `(lat, lon, value)`
    /// arrays, row-major with latitude as the slow axis. Consumers
    /// building JSON grids rely on this ordering.
    pub fn flatten(&self) -> FlatGrid {
        let (nlat, nlon) = (self.nlat(), self.nlon());
        let mut lats = Vec::with_capacity(nlat * nlon);
        let mut lons = Vec::with_capacity(nlat * nlon);
        let mut values = Vec::with_capacity(nlat * nlon);

        for i in 0..nlat {
            for j in 0..nlon {
                lats.push(self.latitudes[i]);
                lons.push(self.longitudes[j]);
                values.push(self.grid_value(i, j));
            }
        }

        FlatGrid { lats, lons, values }
    }

    /// Estimated in-memory footprint of the value array.
    pub fn estimated_bytes(&self) -> usize {
        self.values.len() * std::mem::size_of::<f32>()
    }
}

/// Parallel coordinate/value arrays for one grid slice.
#[derive(Debug, Clone)]
pub struct FlatGrid {
    pub lats: Vec<f64>,
    pub lons: Vec<f64>,
    pub values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_raster() -> Dataset {
        Dataset {
            variable: "sti".to_string(),
            units: None,
            latitudes: vec![-30.0, -30.25],
            longitudes: vec![-71.0, -70.75, -70.5],
            times: None,
            values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        }
    }

    #[test]
    fn test_grid_value_row_major() {
        let ds = sample_raster();
        assert_eq!(ds.grid_value(0, 0), 1.0);
        assert_eq!(ds.grid_value(0, 2), 3.0);
        assert_eq!(ds.grid_value(1, 0), 4.0);
        assert_eq!(ds.grid_value(1, 2), 6.0);
    }

    #[test]
    fn test_flatten_lat_slow_lon_fast() {
        let flat = sample_raster().flatten();
        assert_eq!(flat.lats, vec![-30.0, -30.0, -30.0, -30.25, -30.25, -30.25]);
        assert_eq!(flat.lons, vec![-71.0, -70.75, -70.5, -71.0, -70.75, -70.5]);
        assert_eq!(flat.values, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_series_at() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let ds = Dataset {
            variable: "t2m".to_string(),
            units: Some("K".to_string()),
            latitudes: vec![-30.0, -31.0],
            longitudes: vec![-71.0, -70.0],
            times: Some(vec![t0, t1]),
            values: vec![
                // t0
                280.0, 281.0, 282.0, 283.0, // t1
                290.0, 291.0, 292.0, 293.0,
            ],
        };
        assert_eq!(ds.ntimes(), 2);
        assert_eq!(ds.series_at(0, 0), vec![280.0, 290.0]);
        assert_eq!(ds.series_at(1, 1), vec![283.0, 293.0]);
    }

    #[test]
    fn test_estimated_bytes() {
        assert_eq!(sample_raster().estimated_bytes(), 6 * 4);
    }
}
