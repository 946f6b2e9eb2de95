//! # Chunk Ring Buffer
//!
//! Fixed-capacity circular store of equally sized audio chunks. The analyzer
//! appends every captured chunk and reads the whole history back as one
//! contiguous, oldest-first waveform for the spectrum and pitch passes.

/// Circular store of `num_chunks` slots of `chunk_size` samples each.
///
/// All storage is allocated up front; `add_chunk` only copies.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    slots: Vec<Vec<f32>>,
    chunk_size: usize,
    /// Next slot to be overwritten (the oldest chunk once full).
    cursor: usize,
    /// Slots holding real audio. Reaches `slots.len()` on the first wrap.
    filled: usize,
    full: bool,
    chunks_written: u64,
}

impl RingBuffer {
    /// Creates an empty buffer. Both dimensions are raised to at least 1.
    pub fn new(chunk_size: usize, num_chunks: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let num_chunks = num_chunks.max(1);
        Self {
            slots: vec![vec![0.0; chunk_size]; num_chunks],
            chunk_size,
            cursor: 0,
            filled: 0,
            full: false,
            chunks_written: 0,
        }
    }

    /// Writes one chunk over the oldest slot and advances the cursor.
    ///
    /// A chunk longer than `chunk_size` is truncated; a shorter one is
    /// zero-padded so every slot keeps the same length.
    pub fn add_chunk(&mut self, chunk: &[f32]) {
        let slot = &mut self.slots[self.cursor];
        let n = chunk.len().min(self.chunk_size);
        slot[..n].copy_from_slice(&chunk[..n]);
        slot[n..].fill(0.0);

        self.cursor = (self.cursor + 1) % self.slots.len();
        self.filled = (self.filled + 1).min(self.slots.len());
        self.chunks_written += 1;
        if self.cursor == 0 {
            self.full = true;
        }
    }

    /// Returns all valid samples in chronological order, oldest first.
    ///
    /// Before the first wrap only the chunks written so far are returned, so
    /// the view never mixes real audio with zero-initialized slots.
    pub fn flatten(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.len());
        let start = if self.full { self.cursor } else { 0 };
        for i in 0..self.filled {
            let slot = &self.slots[(start + i) % self.slots.len()];
            out.extend_from_slice(slot);
        }
        out
    }

    /// The most recently written chunk, or silence before the first write.
    pub fn latest_chunk(&self) -> &[f32] {
        let newest = (self.cursor + self.slots.len() - 1) % self.slots.len();
        &self.slots[newest]
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Number of valid samples currently held.
    pub fn len(&self) -> usize {
        self.filled * self.chunk_size
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Number of chunk slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Total chunks accepted since construction, including overwritten ones.
    pub fn chunks_written(&self) -> u64 {
        self.chunks_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(value: f32, size: usize) -> Vec<f32> {
        vec![value; size]
    }

    #[test]
    fn becomes_full_exactly_at_capacity() {
        let mut rb = RingBuffer::new(4, 5);
        for i in 0..4 {
            rb.add_chunk(&chunk(i as f32, 4));
            assert!(!rb.is_full(), "full after only {} chunks", i + 1);
        }
        rb.add_chunk(&chunk(4.0, 4));
        assert!(rb.is_full());

        for i in 0..12 {
            rb.add_chunk(&chunk(i as f32, 4));
            assert!(rb.is_full());
        }
        assert_eq!(rb.chunks_written(), 17);
    }

    #[test]
    fn flatten_rotates_oldest_first_after_wrap() {
        let mut rb = RingBuffer::new(2, 3);
        rb.add_chunk(&[1.0, 1.5]); // A
        rb.add_chunk(&[2.0, 2.5]); // B
        rb.add_chunk(&[3.0, 3.5]); // C
        assert_eq!(rb.flatten(), vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5]);

        rb.add_chunk(&[4.0, 4.5]); // D overwrites A
        assert_eq!(rb.flatten(), vec![2.0, 2.5, 3.0, 3.5, 4.0, 4.5]);
    }

    #[test]
    fn flatten_before_full_contains_only_written_chunks() {
        let mut rb = RingBuffer::new(3, 4);
        assert!(rb.flatten().is_empty());
        assert!(rb.is_empty());

        rb.add_chunk(&[1.0, 2.0, 3.0]);
        rb.add_chunk(&[4.0, 5.0, 6.0]);
        assert_eq!(rb.flatten(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(rb.len(), 6);
    }

    #[test]
    fn wrong_sized_chunks_are_normalized() {
        let mut rb = RingBuffer::new(3, 2);
        rb.add_chunk(&[1.0, 2.0, 3.0, 99.0]);
        rb.add_chunk(&[7.0]);
        assert_eq!(rb.flatten(), vec![1.0, 2.0, 3.0, 7.0, 0.0, 0.0]);
    }

    #[test]
    fn latest_chunk_tracks_newest_write() {
        let mut rb = RingBuffer::new(2, 2);
        assert_eq!(rb.latest_chunk(), &[0.0, 0.0]);
        rb.add_chunk(&[1.0, 1.0]);
        assert_eq!(rb.latest_chunk(), &[1.0, 1.0]);
        rb.add_chunk(&[2.0, 2.0]);
        rb.add_chunk(&[3.0, 3.0]);
        assert_eq!(rb.latest_chunk(), &[3.0, 3.0]);
    }
}
