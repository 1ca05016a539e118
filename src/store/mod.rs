//! Persistent storage: shared SQLite substrate, fingerprint cache, session
//! store, and the data-model types that travel between them.

pub mod model;
#[cfg(feature = "sqlite")]
pub mod fingerprint;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod session;
