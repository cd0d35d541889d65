//! Strongbox Vault - Configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};
use crate::model::SortOption;

/// Page geometry for scanned documents.
///
/// Defaults to A4 portrait at 150 dpi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScanSettings {
    pub page_width_px: u32,
    pub page_height_px: u32,
    /// White border around each page image
    pub margin_px: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// Resolution recorded in the PDF page size
    pub dpi: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            page_width_px: 1240,
            page_height_px: 1754,
            margin_px: 40,
            jpeg_quality: 85,
            dpi: 150,
        }
    }
}

/// Vault configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VaultConfig {
    /// Prompt text passed to the strong authenticator
    pub auth_reason: String,
    /// Consecutive failed unlocks before lockout
    pub max_failed_attempts: u32,
    /// Lockout length (seconds)
    pub lockout_seconds: u64,
    /// Idle re-lock; `None` keeps the vault open until background/sign-out
    pub relock_after_seconds: Option<u64>,
    pub default_sort: SortOption,
    /// Soft-deleted items older than this are purged by a sweep
    pub retention_days: u32,
    pub max_import_bytes: u64,
    pub scan: ScanSettings,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            auth_reason: "Unlock your vault".into(),
            max_failed_attempts: 5,
            lockout_seconds: 300, // 5 minutes
            relock_after_seconds: None,
            default_sort: SortOption::DateDescending,
            retention_days: 30,
            max_import_bytes: 512 * 1024 * 1024,
            scan: ScanSettings::default(),
        }
    }
}

impl VaultConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        let data = std::fs::read(path.as_ref())?;
        let config: Self = serde_json::from_slice(&data)
            .map_err(|e| VaultError::Config(format!("{}: {e}", path.as_ref().display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load if present, otherwise defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> VaultResult<()> {
        self.validate()?;
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn validate(&self) -> VaultResult<()> {
        if self.max_failed_attempts == 0 {
            return Err(VaultError::Config("maxFailedAttempts must be at least 1".into()));
        }
        if self.max_import_bytes == 0 {
            return Err(VaultError::Config("maxImportBytes must be positive".into()));
        }
        if self.relock_after_seconds == Some(0) {
            return Err(VaultError::Config("relockAfterSeconds must be positive".into()));
        }

        let scan = &self.scan;
        if scan.jpeg_quality == 0 || scan.jpeg_quality > 100 {
            return Err(VaultError::Config("scan.jpegQuality must be 1-100".into()));
        }
        if scan.dpi == 0 {
            return Err(VaultError::Config("scan.dpi must be positive".into()));
        }
        if scan.margin_px * 2 >= scan.page_width_px.min(scan.page_height_px) {
            return Err(VaultError::Config("scan margin leaves no printable area".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = VaultConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scan.page_width_px, 1240);
        assert_eq!(config.scan.page_height_px, 1754);
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"retentionDays": 7, "defaultSort": "name"}"#).unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.default_sort, SortOption::Name);
        assert_eq!(config.max_failed_attempts, 5);
    }

    #[test]
    fn test_save_load_and_reject_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = VaultConfig {
            relock_after_seconds: Some(120),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(VaultConfig::load(&path).unwrap(), config);

        std::fs::write(&path, r#"{"maxFailedAttempts": 0}"#).unwrap();
        assert!(matches!(VaultConfig::load(&path), Err(VaultError::Config(_))));
    }
}
