//! Query point and unit types.

use serde::{Deserialize, Serialize};

/// A geographic query point. Latitude is validated at extraction time;
/// longitude may be in either convention and is normalized per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Target units for temperature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetUnits {
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "K")]
    Kelvin,
}

impl TargetUnits {
    /// The unit string reported back in extraction results.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetUnits::Celsius => "C",
            TargetUnits::Kelvin => "K",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_serde_round_trip() {
        let c: TargetUnits = serde_json::from_str("\"C\"").unwrap();
        assert_eq!(c, TargetUnits::Celsius);
        assert_eq!(serde_json::to_string(&TargetUnits::Kelvin).unwrap(), "\"K\"");
    }

    #[test]
    fn test_units_as_str() {
        assert_eq!(TargetUnits::Celsius.as_str(), "C");
        assert_eq!(TargetUnits::Kelvin.as_str(), "K");
    }
}
