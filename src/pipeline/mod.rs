//! Hash pipeline and group builder: the content-equivalence half of the
//! scan (spec §4.5–§4.6).

pub mod group_builder;
#[cfg(feature = "sqlite")]
pub mod hash_pipeline;
