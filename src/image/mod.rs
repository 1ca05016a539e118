//! Perceptual-image grouping engine: pHash, metric tree, union-find
//! clustering (spec §4.7). Gated behind the `images` feature.

#![cfg(feature = "images")]

pub mod grouper;
pub mod metric_tree;
pub mod phash;
pub mod union_find;
