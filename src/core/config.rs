//! Configuration model: TOML file + env var overrides, validation, and the
//! canonical config-hash used for baseline/resume matching (spec §4.9).

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::errors::{DsError, Result};
use crate::core::paths::resolve_absolute_path;
use crate::scanner::patterns::normalize_extension;

/// Grouping mode (spec §6 `mode` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupMode {
    Content,
    ContentAndName,
    NameOnly,
}

impl Default for GroupMode {
    fn default() -> Self {
        Self::Content
    }
}

/// Full scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Ordered list of absolute root paths (order is UI-meaningful but does
    /// not affect the config hash, which sorts roots — spec §4.9).
    pub roots: Vec<PathBuf>,
    pub min_size: u64,
    /// Normalized extension tokens; empty means "all extensions".
    pub extensions: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub protect_system: bool,
    pub follow_symlinks: bool,
    pub skip_hidden: bool,
    pub mode: GroupMode,
    pub byte_verify: bool,
    pub mixed_mode: bool,
    pub detect_folder_dup: bool,
    /// Open Question (spec §9): folder-duplicate manifests are local-level
    /// only by default; this switch opts into the recursive variant.
    pub folder_dup_recursive: bool,
    pub similar_image: bool,
    pub similarity: f64,
    pub incremental_rescan: bool,
    pub baseline_session: Option<String>,
    pub strict_mode: bool,
    pub strict_max_errors: u64,
    pub max_workers: usize,
    /// UI-only: destructive-operation disposition. Excluded from the config
    /// hash (spec §4.9) since it does not affect what is scanned.
    pub use_trash: bool,
    /// Retention knobs for the fingerprint cache and session store (spec §3
    /// Lifecycle), not part of a single scan's identity, also excluded.
    pub fingerprint_retention_days: u64,
    pub session_keep_latest: usize,
    /// Directory holding the persistent store (spec §6 "Persisted state
    /// layout"). Defaults to the platform application-data directory.
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            min_size: 0,
            extensions: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            protect_system: true,
            follow_symlinks: false,
            skip_hidden: true,
            mode: GroupMode::Content,
            byte_verify: false,
            mixed_mode: false,
            detect_folder_dup: false,
            folder_dup_recursive: false,
            similar_image: false,
            similarity: 0.9,
            incremental_rescan: false,
            baseline_session: None,
            strict_mode: false,
            strict_max_errors: 0,
            max_workers: default_max_workers(),
            use_trash: true,
            fingerprint_retention_days: 90,
            session_keep_latest: 20,
            data_dir: default_data_dir(),
        }
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZero::get)
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("DUPSCAN_DATA_DIR") {
        return PathBuf::from(dir);
    }
    #[cfg(unix)]
    {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".local/share/dupscan");
        }
    }
    env::temp_dir().join("dupscan")
}

impl Config {
    /// Load from a TOML file, applying `DUPSCAN_`-prefixed env overrides for
    /// a small set of frequently-tuned scalar fields.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DsError::MissingConfig {
                path: path.to_path_buf(),
            });
        }
        let raw = fs::read_to_string(path).map_err(|e| DsError::io(path, e))?;
        let mut config: Self = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("DUPSCAN_MAX_WORKERS")
            && let Ok(n) = v.parse()
        {
            self.max_workers = n;
        }
        if let Ok(v) = env::var("DUPSCAN_SIMILARITY")
            && let Ok(n) = v.parse()
        {
            self.similarity = n;
        }
        if let Ok(v) = env::var("DUPSCAN_STRICT_MODE") {
            self.strict_mode = v == "1" || v.eq_ignore_ascii_case("true");
        }
    }

    /// Validate configuration synchronously; failures are `config_invalid`
    /// (spec §7) and refuse the run before any stage starts.
    pub fn validate(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(DsError::InvalidConfig {
                details: "at least one root path is required".to_string(),
            });
        }
        if self.max_workers == 0 {
            return Err(DsError::InvalidConfig {
                details: "max_workers must be positive".to_string(),
            });
        }
        let wants_similar_image = self.similar_image || self.mixed_mode;
        if wants_similar_image && !(0.0..=1.0).contains(&self.similarity) {
            return Err(DsError::InvalidConfig {
                details: format!("similarity must be in [0.0, 1.0], got {}", self.similarity),
            });
        }
        if wants_similar_image && self.similarity == 0.0 {
            return Err(DsError::InvalidConfig {
                details: "similarity of 0.0 is rejected; use a positive threshold".to_string(),
            });
        }
        #[cfg(not(feature = "images"))]
        if wants_similar_image {
            return Err(DsError::InvalidConfig {
                details: "similar_image/mixed_mode requested but the images feature is not compiled in"
                    .to_string(),
            });
        }
        for pattern in self.include_patterns.iter().chain(&self.exclude_patterns) {
            crate::scanner::patterns::glob_to_regex(pattern)?;
        }
        Ok(())
    }

    /// Canonical normalized projection used to compute the config hash:
    /// absolutized+sorted roots, normalized+sorted extensions, trimmed+sorted
    /// patterns. UI-only fields (`use_trash`, retention knobs) are excluded.
    #[must_use]
    pub fn canonical_projection(&self) -> CanonicalConfig {
        let mut roots: Vec<PathBuf> = self.roots.iter().map(|r| resolve_absolute_path(r)).collect();
        roots.sort();

        let mut extensions: Vec<String> = self
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect();
        extensions.sort();
        extensions.dedup();

        let mut include_patterns: Vec<String> =
            self.include_patterns.iter().map(|p| p.trim().to_string()).collect();
        include_patterns.sort();

        let mut exclude_patterns: Vec<String> =
            self.exclude_patterns.iter().map(|p| p.trim().to_string()).collect();
        exclude_patterns.sort();

        CanonicalConfig {
            roots,
            min_size: self.min_size,
            extensions,
            include_patterns,
            exclude_patterns,
            protect_system: self.protect_system,
            follow_symlinks: self.follow_symlinks,
            skip_hidden: self.skip_hidden,
            mode: self.mode,
            byte_verify: self.byte_verify,
            mixed_mode: self.mixed_mode,
            detect_folder_dup: self.detect_folder_dup,
            folder_dup_recursive: self.folder_dup_recursive,
            similar_image: self.similar_image,
            similarity: self.similarity,
        }
    }

    /// Hex-encoded SHA-256 over the canonical projection's JSON
    /// serialization. Algorithm strength is unconstrained by the spec for
    /// this bookkeeping digest (unlike content fingerprints).
    #[must_use]
    pub fn config_hash(&self) -> String {
        let projection = self.canonical_projection();
        let json = serde_json::to_vec(&projection).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&json);
        hex_encode(&hasher.finalize())
    }
}

/// The normalized projection fed into the config hash. Field order is
/// stable (derive order), and the JSON encoding is therefore stable too.
#[derive(Debug, Serialize)]
pub struct CanonicalConfig {
    pub roots: Vec<PathBuf>,
    pub min_size: u64,
    pub extensions: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub protect_system: bool,
    pub follow_symlinks: bool,
    pub skip_hidden: bool,
    pub mode: GroupMode,
    pub byte_verify: bool,
    pub mixed_mode: bool,
    pub detect_folder_dup: bool,
    pub folder_dup_recursive: bool,
    pub similar_image: bool,
    pub similarity: f64,
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}
