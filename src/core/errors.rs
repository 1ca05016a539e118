//! DS-prefixed error types with structured error codes, mapped onto the
//! `config_invalid` / `io_transient` / `locked` / `permission` /
//! `store_corrupt` / `cancelled` / `strict_breach` taxonomy.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the crate.
pub type Result<T> = std::result::Result<T, DsError>;

/// Error-taxonomy kind, used by callers that need the coarse
/// classification without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    IoTransient,
    Locked,
    Permission,
    StoreCorrupt,
    Cancelled,
    StrictBreach,
}

/// Top-level error type for the duplicate-scan core.
#[derive(Debug, Error)]
pub enum DsError {
    #[error("[DS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DS-2001] filesystem IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DS-2002] file locked: {path}")]
    Locked { path: PathBuf },

    #[error("[DS-2003] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[DS-3001] persistent store corrupt: {details}")]
    StoreCorrupt { details: String },

    #[error("[DS-3002] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DS-3003] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[DS-3004] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[DS-4001] scan cancelled")]
    Cancelled,

    #[error("[DS-4002] strict-mode error threshold exceeded: {errors_total} errors")]
    StrictBreach { errors_total: u64 },

    #[error("[DS-9000] runtime failure: {details}")]
    Runtime { details: String },
}

impl DsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DS-1001",
            Self::MissingConfig { .. } => "DS-1002",
            Self::ConfigParse { .. } => "DS-1003",
            Self::Io { .. } => "DS-2001",
            Self::Locked { .. } => "DS-2002",
            Self::PermissionDenied { .. } => "DS-2003",
            Self::StoreCorrupt { .. } => "DS-3001",
            Self::Serialization { .. } => "DS-3002",
            Self::Sql { .. } => "DS-3003",
            Self::ChannelClosed { .. } => "DS-3004",
            Self::Cancelled => "DS-4001",
            Self::StrictBreach { .. } => "DS-4002",
            Self::Runtime { .. } => "DS-9000",
        }
    }

    /// Coarse taxonomy kind from spec §7.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig { .. } | Self::MissingConfig { .. } | Self::ConfigParse { .. } => {
                ErrorKind::ConfigInvalid
            }
            Self::Io { .. } => ErrorKind::IoTransient,
            Self::Locked { .. } => ErrorKind::Locked,
            Self::PermissionDenied { .. } => ErrorKind::Permission,
            Self::StoreCorrupt { .. }
            | Self::Serialization { .. }
            | Self::Sql { .. }
            | Self::ChannelClosed { .. }
            | Self::Runtime { .. } => ErrorKind::StoreCorrupt,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::StrictBreach { .. } => ErrorKind::StrictBreach,
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Locked { .. } | Self::ChannelClosed { .. } | Self::Sql { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for DsError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for DsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<DsError> {
        vec![
            DsError::InvalidConfig {
                details: String::new(),
            },
            DsError::MissingConfig {
                path: PathBuf::new(),
            },
            DsError::ConfigParse {
                context: "",
                details: String::new(),
            },
            DsError::Io {
                path: PathBuf::new(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "test"),
            },
            DsError::Locked {
                path: PathBuf::new(),
            },
            DsError::PermissionDenied {
                path: PathBuf::new(),
            },
            DsError::StoreCorrupt {
                details: String::new(),
            },
            DsError::Serialization {
                context: "",
                details: String::new(),
            },
            DsError::Sql {
                context: "",
                details: String::new(),
            },
            DsError::ChannelClosed { component: "" },
            DsError::Cancelled,
            DsError::StrictBreach { errors_total: 0 },
            DsError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let codes: Vec<&str> = all_variants().iter().map(DsError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(codes.len(), unique.len(), "codes must be unique: {codes:?}");
    }

    #[test]
    fn error_codes_have_ds_prefix() {
        for err in all_variants() {
            assert!(err.code().starts_with("DS-"), "bad code: {}", err.code());
        }
    }

    #[test]
    fn error_display_includes_code() {
        let err = DsError::InvalidConfig {
            details: "bad value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("DS-1001"));
        assert!(msg.contains("bad value"));
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(
            DsError::Io {
                path: PathBuf::new(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "test"),
            }
            .is_retryable()
        );
        assert!(
            DsError::Locked {
                path: PathBuf::new()
            }
            .is_retryable()
        );
        assert!(DsError::ChannelClosed { component: "test" }.is_retryable());
        assert!(!DsError::Cancelled.is_retryable());
        assert!(
            !DsError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn kinds_match_taxonomy() {
        assert_eq!(
            DsError::Cancelled.kind() as u8,
            ErrorKind::Cancelled as u8
        );
        assert_eq!(
            DsError::StrictBreach { errors_total: 5 }.kind() as u8,
            ErrorKind::StrictBreach as u8
        );
        assert_eq!(
            DsError::Locked {
                path: PathBuf::new()
            }
            .kind() as u8,
            ErrorKind::Locked as u8
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = DsError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "DS-2001");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: DsError = json_err.into();
        assert_eq!(err.code(), "DS-3002");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: DsError = toml_err.into();
        assert_eq!(err.code(), "DS-1003");
    }
}
