//! Emitter-side overflow queue.
//!
//! Holds payloads that did not fit into the data block, in write order.
//! Bytes leave only from the front, possibly splitting a payload across two
//! data block segments.

use std::collections::VecDeque;

#[derive(Debug, Default)]
pub(crate) struct Cache {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the front chunk already moved out.
    head: usize,
    len: usize,
}

impl Cache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Total queued bytes.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.chunks.push_back(bytes.to_vec());
    }

    /// Moves up to `limit` bytes off the front, handing them to `emit` in
    /// order. Returns how many bytes were moved.
    pub(crate) fn fill(&mut self, limit: usize, mut emit: impl FnMut(&[u8])) -> usize {
        let mut moved = 0;
        while moved < limit {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let rest = &front[self.head..];
            let take = rest.len().min(limit - moved);
            emit(&rest[..take]);
            moved += take;
            self.head += take;
            if self.head == front.len() {
                self.chunks.pop_front();
                self.head = 0;
            }
        }
        self.len -= moved;
        moved
    }

    /// Copy of everything still queued.
    pub(crate) fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for (idx, chunk) in self.chunks.iter().enumerate() {
            let start = if idx == 0 { self.head } else { 0 };
            out.extend_from_slice(&chunk[start..]);
        }
        out
    }
}
