//! Consistent-hash ring for key ownership.
//!
//! Each node is placed on a 32-bit ring at `replicas` points. A key is owned
//! by the first point at or after its own hash, wrapping around. Adding or
//! removing one node moves only the keys adjacent to its points.
//!
//! The ring is a sorted vector of `(point, node index)` pairs; lookups are a
//! binary search.

use sha2::{Digest, Sha256};

#[derive(Clone, Debug)]
pub struct HashRing {
    nodes: Vec<String>,
    points: Vec<(u32, usize)>,
}

fn point(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

impl HashRing {
    /// Build a ring over `nodes`. Duplicate names are collapsed.
    pub fn new<I, S>(nodes: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = nodes.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();

        let replicas = replicas.max(1);
        let mut points = Vec::with_capacity(names.len() * replicas);
        for (idx, name) in names.iter().enumerate() {
            for replica in 0..replicas {
                points.push((point(format!("{replica}{name}").as_bytes()), idx));
            }
        }
        // Ties resolve to the lower node index so every process agrees.
        points.sort_unstable();

        Self {
            nodes: names,
            points,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Index into [`nodes`](Self::nodes) of the owner of `key`.
    pub fn owner_index(&self, key: &[u8]) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let h = point(key);
        let pos = self.points.partition_point(|(p, _)| *p < h);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(idx)
    }

    /// Name of the owner of `key`.
    pub fn owner(&self, key: &[u8]) -> Option<&str> {
        self.owner_index(key).map(|i| self.nodes[i].as_str())
    }
}
