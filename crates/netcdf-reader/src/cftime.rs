//! CF-convention time coordinate decoding.
//!
//! Historic files carry their time axis as raw numbers plus a units
//! attribute like `"hours since 1900-01-01 00:00:00.0"` (classic ERA5)
//! or `"seconds since 1970-01-01"` (current CDS output).

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sti_common::{StiError, StiResult};

/// Decode raw CF time values into UTC timestamps.
///
/// Supported units: seconds, hours, days. Anything else is an error
/// carrying the raw units string.
pub fn decode_cf_times(raw: &[f64], units: &str) -> StiResult<Vec<DateTime<Utc>>> {
    let (unit_secs, epoch) = parse_cf_time_units(units)?;

    Ok(raw
        .iter()
        .map(|v| epoch + Duration::seconds((v * unit_secs).round() as i64))
        .collect())
}

/// Split `"<unit> since <epoch>"` into seconds-per-unit and the epoch.
fn parse_cf_time_units(units: &str) -> StiResult<(f64, DateTime<Utc>)> {
    let parts: Vec<&str> = units.splitn(2, " since ").collect();
    if parts.len() != 2 {
        return Err(StiError::DataReadError(format!(
            "time units missing 'since' clause: '{}'",
            units
        )));
    }

    let unit_secs = match parts[0].trim().to_lowercase().as_str() {
        "seconds" | "second" | "s" => 1.0,
        "hours" | "hour" | "h" => 3600.0,
        "days" | "day" | "d" => 86_400.0,
        other => {
            return Err(StiError::DataReadError(format!(
                "unsupported time unit '{}' (raw='{}')",
                other, units
            )));
        }
    };

    let epoch = parse_epoch(parts[1].trim()).ok_or_else(|| {
        StiError::DataReadError(format!("unparseable time epoch in '{}'", units))
    })?;

    Ok((unit_secs, epoch))
}

fn parse_epoch(s: &str) -> Option<DateTime<Utc>> {
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .map(|d| Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap()))
}
