use bytes::Bytes;

/// An immutable run of bytes queued for delivery.
///
/// The payload is copied out of the caller's memory at construction, since
/// producer buffers are only valid for the duration of the call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    payload: Bytes,
}

impl Chunk {
    /// Copy `data` into a new chunk.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.payload.as_ref()
    }

    /// Consume the chunk and return the payload.
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
