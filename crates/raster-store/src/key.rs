//! Raster identity and remote key layout.

use serde::{Deserialize, Serialize};
use sti_common::{StiError, StiResult};

/// Identity of one raster file: forecast run + step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterKey {
    run: String,
    step: String,
}

impl RasterKey {
    /// Build a key from already-formatted components: a 10-digit run
    /// (YYYYMMDDHH) and a 3-digit zero-padded step.
    pub fn new(run: impl Into<String>, step: impl Into<String>) -> StiResult<Self> {
        let run = run.into();
        let step = step.into();

        if run.len() != 10 || !run.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StiError::InvalidInput(format!(
                "run must be 10 digits (YYYYMMDDHH), got '{}'",
                run
            )));
        }
        if step.len() != 3 || !step.bytes().all(|b| b.is_ascii_digit()) {
            return Err(StiError::InvalidInput(format!(
                "step must be 3 zero-padded digits, got '{}'",
                step
            )));
        }

        Ok(Self { run, step })
    }

    /// Build a key from a run string and a numeric step (e.g. 48 -> "048").
    pub fn from_parts(run: &str, step: u32) -> StiResult<Self> {
        if step > 999 {
            return Err(StiError::InvalidInput(format!(
                "step {} does not fit 3 digits",
                step
            )));
        }
        Self::new(run, format!("{:03}", step))
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn step(&self) -> &str {
        &self.step
    }
}

/// Naming convention of the index bucket.
///
/// Objects live at
/// `<base_prefix>run=<run>/step=<step>/<index>_<region>_run=<run>_step=<step>.nc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLayout {
    /// Prefix under which runs are laid out, with trailing slash
    pub base_prefix: String,
    /// Index name used in object filenames (and as the payload variable)
    pub index: String,
    /// Region tag used in object filenames
    pub region: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            base_prefix: "indices/sti/".to_string(),
            index: "sti".to_string(),
            region: "chile".to_string(),
        }
    }
}

impl RemoteLayout {
    /// Object key for a raster.
    pub fn object_key(&self, key: &RasterKey) -> String {
        format!(
            "{}run={run}/step={step}/{index}_{region}_run={run}_step={step}.nc",
            self.base_prefix,
            run = key.run(),
            step = key.step(),
            index = self.index,
            region = self.region,
        )
    }

    /// Filename used in the local cache directory.
    pub fn local_filename(&self, key: &RasterKey) -> String {
        format!("{}_{}_{}.nc", self.index, key.run(), key.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_validation() {
        assert!(RasterKey::new("2025111500", "072").is_ok());
        assert!(RasterKey::new("20251115", "072").is_err());
        assert!(RasterKey::new("2025111500", "72").is_err());
        assert!(RasterKey::new("20251115xx", "072").is_err());
    }

    #[test]
    fn test_step_normalization() {
        let key = RasterKey::from_parts("2025111500", 48).unwrap();
        assert_eq!(key.step(), "048");
        assert!(RasterKey::from_parts("2025111500", 1000).is_err());
    }

    #[test]
    fn test_object_key_layout() {
        let layout = RemoteLayout::default();
        let key = RasterKey::new("2025111500", "072").unwrap();
        assert_eq!(
            layout.object_key(&key),
            "indices/sti/run=2025111500/step=072/sti_chile_run=2025111500_step=072.nc"
        );
        assert_eq!(layout.local_filename(&key), "sti_2025111500_072.nc");
    }
}
