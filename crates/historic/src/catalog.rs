//! Ordered catalog of historic source files.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sti_common::StiResult;

/// Configuration of the historic file catalog.
///
/// `base_candidates` are tried in order and only the first existing
/// one is used (widest coverage first); every existing update layer is
/// appended after it. Later entries override earlier ones at
/// overlapping time coordinates — the merge engine depends on this
/// ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Directory holding the historic NetCDF files
    pub dir: PathBuf,
    /// Base layer candidates, widest coverage first
    pub base_candidates: Vec<String>,
    /// Update layers, applied on top of the base in order
    pub update_layers: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("historic"),
            base_candidates: vec![
                "ERA5_T2M_monthly_1991_2025_chile.nc".to_string(),
                "ERA5_T2M_monthly_1991_2024_chile.nc".to_string(),
            ],
            update_layers: vec!["ERA5_T2M_monthly_2025_01_10_chile.nc".to_string()],
        }
    }
}

/// One source file plus the stat fields that form its cache signature.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub mtime_ns: i64,
    pub size: u64,
}

impl SourceDescriptor {
    /// Stat a file into a descriptor.
    pub fn stat(path: PathBuf) -> StiResult<Self> {
        let meta = std::fs::metadata(&path)?;
        let mtime_ns = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos() as i64);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self {
            path,
            name,
            mtime_ns,
            size: meta.len(),
        })
    }

    pub fn signature(&self) -> SourceSignature {
        SourceSignature {
            name: self.name.clone(),
            mtime_ns: self.mtime_ns,
            size: self.size,
        }
    }
}

/// `(name, mtime, size)` — changes whenever the file is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSignature {
    pub name: String,
    pub mtime_ns: i64,
    pub size: u64,
}

/// Combined signature of an ordered source list; the merge cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeSignature(Vec<SourceSignature>);

impl MergeSignature {
    pub fn of(sources: &[SourceDescriptor]) -> Self {
        Self(sources.iter().map(SourceDescriptor::signature).collect())
    }
}

/// Supplies the ordered list of historic sources.
pub struct SourceCatalog {
    config: CatalogConfig,
}

impl SourceCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self { config }
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// First existing base candidate, then every existing update
    /// layer, in configured order. May be empty.
    pub fn ordered_sources(&self) -> StiResult<Vec<SourceDescriptor>> {
        let mut sources = Vec::new();

        for name in &self.config.base_candidates {
            let path = self.config.dir.join(name);
            if path.exists() {
                sources.push(SourceDescriptor::stat(path)?);
                break;
            }
        }

        for name in &self.config.update_layers {
            let path = self.config.dir.join(name);
            if path.exists() {
                sources.push(SourceDescriptor::stat(path)?);
            }
        }

        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> CatalogConfig {
        CatalogConfig {
            dir: dir.to_path_buf(),
            ..CatalogConfig::default()
        }
    }

    #[test]
    fn test_prefers_widest_base() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ERA5_T2M_monthly_1991_2024_chile.nc"), b"a").unwrap();
        std::fs::write(dir.path().join("ERA5_T2M_monthly_1991_2025_chile.nc"), b"b").unwrap();

        let catalog = SourceCatalog::new(config_in(dir.path()));
        let sources = catalog.ordered_sources().unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "ERA5_T2M_monthly_1991_2025_chile.nc");
    }

    #[test]
    fn test_falls_back_to_narrow_base_and_appends_updates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("ERA5_T2M_monthly_1991_2024_chile.nc"), b"a").unwrap();
        std::fs::write(dir.path().join("ERA5_T2M_monthly_2025_01_10_chile.nc"), b"u").unwrap();

        let catalog = SourceCatalog::new(config_in(dir.path()));
        let sources = catalog.ordered_sources().unwrap();
        let names: Vec<_> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ERA5_T2M_monthly_1991_2024_chile.nc",
                "ERA5_T2M_monthly_2025_01_10_chile.nc"
            ]
        );
    }

    #[test]
    fn test_empty_directory_yields_no_sources() {
        let dir = TempDir::new().unwrap();
        let catalog = SourceCatalog::new(config_in(dir.path()));
        assert!(catalog.ordered_sources().unwrap().is_empty());
    }

    #[test]
    fn test_signature_changes_with_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ERA5_T2M_monthly_2025_01_10_chile.nc");
        std::fs::write(&path, b"one").unwrap();
        let before = SourceDescriptor::stat(path.clone()).unwrap().signature();

        std::fs::write(&path, b"other length").unwrap();
        let after = SourceDescriptor::stat(path).unwrap().signature();
        assert_ne!(before, after);
    }
}
