//! Splitting outbound bytes into payload-sized writes.

use std::num::NonZeroUsize;

use bytes::Bytes;

/// Smallest payload every BLE link can carry (23-byte ATT MTU minus header).
pub const MIN_PAYLOAD: usize = 20;

/// ATT header bytes subtracted from the MTU for a write payload.
const ATT_HEADER: usize = 3;

/// Maximum number of bytes in a single GATT write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PayloadSize(NonZeroUsize);

impl PayloadSize {
    /// The conservative size used when the link reports nothing.
    pub const MIN: Self = Self(NonZeroUsize::MIN.saturating_add(MIN_PAYLOAD - 1));

    /// Create a payload size; `None` for zero.
    #[must_use]
    pub fn new(size: usize) -> Option<Self> {
        NonZeroUsize::new(size).map(Self)
    }

    /// Resolve the size reported by a link, falling back to [`MIN_PAYLOAD`].
    #[must_use]
    pub fn negotiated(reported: Option<usize>) -> Self {
        reported.and_then(Self::new).unwrap_or(Self::MIN)
    }

    /// Derive the write payload from an ATT MTU.
    #[must_use]
    pub fn from_att_mtu(mtu: u16) -> Self {
        let payload = usize::from(mtu).saturating_sub(ATT_HEADER);
        Self::new(payload.max(MIN_PAYLOAD)).unwrap_or(Self::MIN)
    }

    /// The size in bytes.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for PayloadSize {
    fn default() -> Self {
        Self::MIN
    }
}

impl std::fmt::Display for PayloadSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Splits byte buffers into chunks no longer than the payload size.
///
/// Chunks come out in input order and are never empty; an empty
/// buffer produces no chunks at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameChunker {
    max: PayloadSize,
}

impl FrameChunker {
    /// Create a chunker for the given payload size.
    #[must_use]
    pub const fn new(max: PayloadSize) -> Self {
        Self { max }
    }

    /// The payload size this chunker enforces.
    #[must_use]
    pub const fn max(&self) -> PayloadSize {
        self.max
    }

    /// Borrowing split.
    pub fn chunks<'a>(&self, buf: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        buf.chunks(self.max.get())
    }

    /// Zero-copy split of an owned buffer.
    #[must_use]
    pub fn split(&self, mut buf: Bytes) -> Vec<Bytes> {
        let max = self.max.get();
        let mut out = Vec::with_capacity(buf.len().div_ceil(max));
        while !buf.is_empty() {
            let at = buf.len().min(max);
            out.push(buf.split_to(at));
        }
        out
    }
}
