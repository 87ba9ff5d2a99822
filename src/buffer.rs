//! Growable byte accumulator
//!
//! Server responses arrive in chunks and are appended here until the
//! parser finds the tagged completion. The buffer only ever grows within
//! a command (doubling capacity, never shrinking) and is reset before the
//! next one. FETCH body views are byte ranges into this storage, valid
//! until the next reset.

/// Append-only byte buffer with explicit capacity management.
#[derive(Debug)]
pub(crate) struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            data: Vec::with_capacity(n),
        }
    }

    /// Drop the contents, keeping the allocation.
    pub(crate) fn reset(&mut self) {
        self.data.clear();
    }

    /// Grow capacity by doubling until `additional` more bytes fit.
    pub(crate) fn ensure(&mut self, additional: usize) {
        let needed = self.data.len() + additional;
        if self.data.capacity() >= needed {
            return;
        }
        let mut cap = self.data.capacity().max(1);
        while cap < needed {
            cap *= 2;
        }
        self.data.reserve_exact(cap - self.data.len());
    }

    pub(crate) fn extend(&mut self, chunk: &[u8]) {
        self.ensure(chunk.len());
        self.data.extend_from_slice(chunk);
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
