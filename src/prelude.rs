//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dupscan_core::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, GroupMode};
pub use crate::core::errors::{DsError, Result};
pub use crate::core::hash::{Digest128, full_hash, partial_hash};

// Scanner
pub use crate::scanner::filter::FilterEngine;
pub use crate::scanner::patterns::GlobPattern;
pub use crate::scanner::protected_roots::ProtectedRoots;
pub use crate::scanner::walker::{DirectoryWalker, WalkerConfig};

// Data model
pub use crate::store::model::{FileRecord, GroupKey, SessionStatus, Stage};

// Orchestrator
#[cfg(feature = "sqlite")]
pub use crate::orchestrator::{CancelToken, Callbacks, Completion, SessionResult};
#[cfg(feature = "sqlite")]
pub use crate::store::fingerprint::FingerprintStore;
#[cfg(feature = "sqlite")]
pub use crate::store::session::SessionStore;
