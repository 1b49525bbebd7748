//! Partitioning a batch into contiguous chunks.

use serde::Serialize;

use super::request::CreationRequest;

/// Number of chunks a batch is split into, and the dispatch concurrency bound.
pub const DEFAULT_FANOUT: usize = 5;

/// A contiguous slice of a batch, tagged with its position in the split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position of this chunk in the split (0-based)
    pub index: usize,
    /// Offset of the first request within the original batch
    pub offset: usize,
    pub requests: Vec<CreationRequest>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

/// Split `batch` into chunks of `ceil(len / fanout)` requests each.
///
/// The last chunk may be shorter. An empty batch yields no chunks. Chunks
/// partition the batch exactly: concatenating them in order reproduces it.
/// A `fanout` of zero is treated as one.
pub fn split(batch: &[CreationRequest], fanout: usize) -> Vec<Chunk> {
    if batch.is_empty() {
        return Vec::new();
    }

    let fanout = fanout.max(1);
    let chunk_size = batch.len().div_ceil(fanout);

    batch
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, requests)| Chunk {
            index,
            offset: index * chunk_size,
            requests: requests.to_vec(),
        })
        .collect()
}
