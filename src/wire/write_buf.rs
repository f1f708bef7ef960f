use crate::error::{Error, ErrorKind, Result};
use crate::protocol::MAX_MESSAGE_LENGTH;

/// Initial soft capacity of a write buffer.
const INITIAL_LIMIT: usize = 4096;

/// An owned write buffer with a soft capacity.
///
/// Writes past the capacity fail with a retryable [`ErrorKind::BufferFull`];
/// the caller grows the buffer and re-encodes from scratch. The capacity
/// doubles per grow and is capped by the protocol's maximum message
/// length, so a message that legitimately exceeds the protocol limit
/// surfaces as an encode error rather than endless growth.
#[derive(Debug)]
pub(crate) struct WriteBuf {
    data: Vec<u8>,
    limit: usize,
}

impl WriteBuf {
    pub(crate) fn new() -> Self {
        Self::with_limit(INITIAL_LIMIT)
    }

    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn get(&self) -> &[u8] {
        &self.data
    }

    /// Move the encoded bytes out, leaving the buffer empty but keeping
    /// its capacity.
    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Whether the soft capacity can still grow.
    pub(crate) fn can_grow(&self) -> bool {
        self.limit < MAX_MESSAGE_LENGTH
    }

    /// Double the soft capacity, up to the protocol maximum.
    pub(crate) fn grow(&mut self) {
        self.limit = (self.limit * 2).min(MAX_MESSAGE_LENGTH);
    }

    pub(crate) fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        if self.data.len() + bytes.len() > self.limit {
            return Err(Error::new(ErrorKind::BufferFull));
        }

        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Append `n` zero bytes.
    pub(crate) fn push_zeros(&mut self, n: usize) -> Result<()> {
        if self.data.len() + n > self.limit {
            return Err(Error::new(ErrorKind::BufferFull));
        }

        self.data.resize(self.data.len() + n, 0);
        Ok(())
    }

    /// Overwrite a previously reserved length word in place, in native
    /// byte order.
    pub(crate) fn patch_u32(&mut self, at: usize, value: u32) {
        self.data[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }
}
