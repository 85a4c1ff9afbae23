//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to ambient credentials if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to ambient credentials if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for
        /// MinIO and some S3-compatible services; AWS S3 itself requires
        /// virtual-hosted style (false).
        #[serde(default)]
        force_path_style: bool,
    },
    /// In-memory storage. Contents do not survive the process; intended
    /// for tests and ephemeral deployments.
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        match self {
            Self::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err(crate::Error::Config(
                        "filesystem storage path cannot be empty".to_string(),
                    ));
                }
            }
            Self::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                if bucket.is_empty() {
                    return Err(crate::Error::Config(
                        "S3 bucket cannot be empty".to_string(),
                    ));
                }
                if access_key_id.is_some() != secret_access_key.is_some() {
                    return Err(crate::Error::Config(
                        "S3 credentials must provide both access_key_id and secret_access_key"
                            .to_string(),
                    ));
                }
            }
            Self::Memory => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filesystem() {
        let config = StorageConfig::Filesystem {
            path: PathBuf::from("/var/lib/caisson"),
        };
        assert!(config.validate().is_ok());

        let config = StorageConfig::Filesystem {
            path: PathBuf::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };
        match config.validate() {
            Err(crate::Error::Config(_)) => {}
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_deserializes_tagged() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"type":"memory"}"#).expect("memory config");
        assert!(matches!(config, StorageConfig::Memory));
    }
}
