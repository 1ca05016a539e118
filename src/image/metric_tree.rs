//! Vantage-point tree over 64-bit perceptual hashes, supporting radius
//! queries under Hamming distance in sublinear expected time (spec §4.7).

#![cfg(feature = "images")]

use crate::image::phash::PerceptualHash;

enum Node {
    Leaf {
        index: usize,
        hash: PerceptualHash,
    },
    Branch {
        index: usize,
        hash: PerceptualHash,
        radius: u32,
        inside: Box<Node>,
        outside: Box<Node>,
    },
}

/// A static vantage-point tree. Built once from the full candidate set,
/// then queried once per candidate for nearby clusters.
pub struct MetricTree {
    root: Option<Node>,
}

impl MetricTree {
    /// Build a tree over `items` (index, hash) pairs.
    #[must_use]
    pub fn build(items: Vec<(usize, PerceptualHash)>) -> Self {
        Self {
            root: build_node(items),
        }
    }

    /// Return the indices of every item within `radius` Hamming distance of
    /// `query`.
    #[must_use]
    pub fn query_radius(&self, query: PerceptualHash, radius: u32) -> Vec<usize> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            search(root, query, radius, &mut out);
        }
        out
    }
}

fn build_node(mut items: Vec<(usize, PerceptualHash)>) -> Option<Node> {
    if items.is_empty() {
        return None;
    }
    if items.len() == 1 {
        let (index, hash) = items[0];
        return Some(Node::Leaf { index, hash });
    }

    let (vantage_index, vantage_hash) = items.remove(0);
    let mut distances: Vec<(u32, (usize, PerceptualHash))> = items
        .into_iter()
        .map(|item| (vantage_hash.hamming_distance(item.1), item))
        .collect();
    distances.sort_by_key(|(d, _)| *d);

    let mid = distances.len() / 2;
    let radius = distances.get(mid).map_or(0, |(d, _)| *d);

    let (inside_items, outside_items): (Vec<_>, Vec<_>) =
        distances.into_iter().partition(|(d, _)| *d <= radius);

    let inside = build_node(inside_items.into_iter().map(|(_, item)| item).collect());
    let outside = build_node(outside_items.into_iter().map(|(_, item)| item).collect());

    Some(Node::Branch {
        index: vantage_index,
        hash: vantage_hash,
        radius,
        inside: Box::new(inside.unwrap_or(Node::Leaf {
            index: vantage_index,
            hash: vantage_hash,
        })),
        outside: Box::new(outside.unwrap_or(Node::Leaf {
            index: vantage_index,
            hash: vantage_hash,
        })),
    })
}

fn search(node: &Node, query: PerceptualHash, radius: u32, out: &mut Vec<usize>) {
    match node {
        Node::Leaf { index, hash } => {
            if hash.hamming_distance(query) <= radius {
                out.push(*index);
            }
        }
        Node::Branch {
            index,
            hash,
            radius: node_radius,
            inside,
            outside,
        } => {
            let d = hash.hamming_distance(query);
            if d <= radius {
                out.push(*index);
            }
            // Triangle-inequality pruning: only descend into a branch whose
            // distance range could contain a point within `radius`.
            if d <= node_radius + radius {
                search(inside, query, radius, out);
            }
            if d + radius >= *node_radius || d > *node_radius {
                search(outside, query, radius, out);
            }
        }
    }
}
