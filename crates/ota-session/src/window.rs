//! Receive window: which of the next `window_size` chunks have arrived.
//!
//! Bit `i` of the bitmap stands for absolute chunk `chunk_index + i + 1`.
//! `chunk_index` and `file_offset` only ever advance over a contiguous
//! prefix; out-of-order chunks sit in the bitmap until the gap before them
//! is filled.

use bytes::Bytes;

const WORD_BITS: usize = u32::BITS as usize;

// ── Bitmap ────────────────────────────────────────────────────────────────────

/// Fixed-capacity bit-set backed by `u32` words.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkBitmap {
    words: Vec<u32>,
    bits: usize,
}

impl ChunkBitmap {
    pub fn new(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(WORD_BITS)],
            bits,
        }
    }

    pub fn get(&self, pos: usize) -> bool {
        pos < self.bits && self.words[pos / WORD_BITS] & (1 << (pos % WORD_BITS)) != 0
    }

    /// Set bit `pos`. Positions past the capacity are ignored.
    pub fn set(&mut self, pos: usize) {
        if pos < self.bits {
            self.words[pos / WORD_BITS] |= 1 << (pos % WORD_BITS);
        }
    }

    /// Move every bit `n` positions towards zero. The lowest `n` bits fall off.
    pub fn shift_right(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        if n >= self.bits {
            self.clear();
            return;
        }
        let word_shift = n / WORD_BITS;
        let bit_shift = n % WORD_BITS;
        for i in 0..self.words.len() {
            // Source words are at or above `i`, so they are still unshifted.
            let lo = self.words.get(i + word_shift).copied().unwrap_or(0);
            let hi = self.words.get(i + word_shift + 1).copied().unwrap_or(0);
            self.words[i] = if bit_shift == 0 {
                lo
            } else {
                (lo >> bit_shift) | (hi << (WORD_BITS - bit_shift))
            };
        }
    }

    /// Length of the run of set bits starting at position 0.
    pub fn leading_ones(&self) -> usize {
        let mut count = 0;
        for w in &self.words {
            let ones = w.trailing_ones() as usize;
            count += ones;
            if ones < WORD_BITS {
                break;
            }
        }
        count.min(self.bits)
    }

    pub fn any(&self) -> bool {
        self.words.iter().any(|w| *w != 0)
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Little-endian words up to and including the last non-zero one.
    /// Empty when no bit is set.
    pub fn to_trimmed_le_bytes(&self) -> Bytes {
        let used = self
            .words
            .iter()
            .rposition(|w| *w != 0)
            .map_or(0, |last| last + 1);
        let mut out = Vec::with_capacity(used * 4);
        for w in &self.words[..used] {
            out.extend_from_slice(&w.to_le_bytes());
        }
        Bytes::from(out)
    }
}

// ── Window ────────────────────────────────────────────────────────────────────

/// What `mark_received` did with a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Already confirmed or already buffered.
    Duplicate,
    /// Beyond the right edge of the window. Not stored; the peer resends.
    Dropped,
    /// New data to persist.
    Stored {
        /// Absolute file offset of the chunk.
        offset: usize,
        /// Contiguous file offset after this chunk was accounted for.
        contiguous_offset: usize,
        /// A gap exists right before this chunk.
        out_of_order: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiveWindow {
    bitmap: ChunkBitmap,
    window_size: usize,
    chunk_size: usize,
    chunk_index: usize,
    file_offset: usize,
    file_size: usize,
}

impl ReceiveWindow {
    /// A window of `window_size` chunks whose left edge sits at `file_offset`.
    pub fn new(window_size: usize, chunk_size: usize, file_offset: usize, file_size: usize) -> Self {
        Self {
            bitmap: ChunkBitmap::new(window_size),
            window_size,
            chunk_size,
            chunk_index: 0,
            file_offset: file_offset.min(file_size),
            file_size,
        }
    }

    /// Record arrival of 1-based chunk `index`.
    pub fn mark_received(&mut self, index: usize) -> Placement {
        if index <= self.chunk_index {
            return Placement::Duplicate;
        }
        if index > self.chunk_index + self.window_size {
            return Placement::Dropped;
        }

        let relative = index - self.chunk_index - 1;
        if self.bitmap.get(relative) {
            return Placement::Duplicate;
        }
        self.bitmap.set(relative);

        let offset = self.file_offset + relative * self.chunk_size;
        let out_of_order = relative > 0 && !self.bitmap.get(relative - 1);
        if relative == 0 {
            self.slide();
        }

        Placement::Stored {
            offset,
            contiguous_offset: self.file_offset,
            out_of_order,
        }
    }

    fn slide(&mut self) {
        loop {
            let run = self.bitmap.leading_ones();
            if run == 0 {
                break;
            }
            self.bitmap.shift_right(run);
            self.chunk_index += run;
            self.file_offset += run * self.chunk_size;
        }
        self.file_offset = self.file_offset.min(self.file_size);
    }

    /// Number of contiguously confirmed chunks.
    pub fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    /// Contiguous bytes confirmed from the start of the file.
    pub fn file_offset(&self) -> usize {
        self.file_offset
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Whether out-of-order chunks are buffered past a gap.
    pub fn has_gaps(&self) -> bool {
        self.bitmap.any()
    }

    pub fn bitmap(&self) -> &ChunkBitmap {
        &self.bitmap
    }
}
