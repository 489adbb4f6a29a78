use std::collections::VecDeque;

use strata_result::{Error, Result};
use strata_types::ChunkKey;

/// Strict least-recently-used ordering over opaque chunk keys. A touch moves
/// the key to the back of the queue; eviction pops the front.
#[derive(Default)]
pub struct LruEvictionAlgorithm {
    queue: VecDeque<ChunkKey>,
}

impl LruEvictionAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` as most recently used, inserting it if absent.
    pub fn touch_chunk(&mut self, key: &ChunkKey) {
        self.remove_chunk(key);
        self.queue.push_back(key.clone());
    }

    pub fn remove_chunk(&mut self, key: &ChunkKey) {
        if let Some(pos) = self.queue.iter().position(|k| k == key) {
            self.queue.remove(pos);
        }
    }

    /// Pop the least recently used key.
    pub fn evict_next_chunk(&mut self) -> Result<ChunkKey> {
        self.queue
            .pop_front()
            .ok_or_else(|| Error::Internal("eviction requested from an empty queue".to_string()))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
