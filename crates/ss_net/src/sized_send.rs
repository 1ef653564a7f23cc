//! Outbound sized-send descriptors (§3, §4.5 "Sized-Send Engine").

/// Supplies bytes for an outbound sized transfer, `[offset, offset+len)` at
/// a time.
///
/// Called without the connection's locks held (§4.5 step 4), since filling
/// the buffer may perform I/O (reading a file, a database blob, etc). A
/// call with an empty `buf` signals the transfer is finished or cancelled
/// (§4.5 step 6); the provider should treat that as its cue to release any
/// resources it's holding.
pub trait SizedSendProvider: Send {
    /// Fills `buf` with the bytes starting at `offset`, returning how many
    /// bytes were actually written (normally `buf.len()`).
    fn provide(&mut self, offset: u32, buf: &mut [u8]) -> usize;
}

impl<F> SizedSendProvider for F
where
    F: FnMut(u32, &mut [u8]) -> usize + Send,
{
    fn provide(&mut self, offset: u32, buf: &mut [u8]) -> usize {
        (self)(offset, buf)
    }
}

/// One outbound sized transfer in progress for a connection.
pub struct SizedSendDescriptor {
    /// Application-defined type byte, echoed in every chunk header so the
    /// peer's sized-packet handler table can route it.
    pub payload_type: u8,
    /// Total length of the transfer.
    pub total_len: u32,
    /// Bytes already produced and enqueued.
    pub offset: u32,
    /// Source of the transfer's bytes.
    pub provider: Box<dyn SizedSendProvider>,
    /// Set when the application cancels this transfer locally.
    pub cancelled_by_user: bool,
    /// Set when a 0x0B arrives from the peer for this transfer.
    pub cancelled_by_peer: bool,
}

impl std::fmt::Debug for SizedSendDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizedSendDescriptor")
            .field("payload_type", &self.payload_type)
            .field("total_len", &self.total_len)
            .field("offset", &self.offset)
            .field("cancelled_by_user", &self.cancelled_by_user)
            .field("cancelled_by_peer", &self.cancelled_by_peer)
            .finish_non_exhaustive()
    }
}

impl SizedSendDescriptor {
    /// Starts a new descriptor at offset 0.
    pub fn new(payload_type: u8, total_len: u32, provider: Box<dyn SizedSendProvider>) -> Self {
        Self {
            payload_type,
            total_len,
            offset: 0,
            provider,
            cancelled_by_user: false,
            cancelled_by_peer: false,
        }
    }

    /// Whether this transfer has been cancelled, by either side.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.cancelled_by_user || self.cancelled_by_peer
    }

    /// Bytes left to produce.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.total_len - self.offset
    }

    /// Whether every byte has been produced.
    #[must_use]
    pub const fn is_done(&self) -> bool {
        self.offset >= self.total_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_closures_implement_the_trait() {
        let data = b"0123456789".to_vec();
        let mut provider: Box<dyn SizedSendProvider> = Box::new(move |offset: u32, buf: &mut [u8]| {
            let offset = offset as usize;
            let n = buf.len().min(data.len() - offset);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            n
        });

        let mut out = [0u8; 4];
        assert_eq!(4, provider.provide(0, &mut out));
        assert_eq!(b"0123", &out);
        assert_eq!(4, provider.provide(4, &mut out));
        assert_eq!(b"4567", &out);
    }

    #[test]
    fn remaining_and_is_done_track_offset() {
        let mut descriptor =
            SizedSendDescriptor::new(1, 100, Box::new(|_offset: u32, _buf: &mut [u8]| 0));
        assert_eq!(100, descriptor.remaining());
        assert!(!descriptor.is_done());

        descriptor.offset = 100;
        assert_eq!(0, descriptor.remaining());
        assert!(descriptor.is_done());
    }

    #[test]
    fn cancellation_from_either_side_is_detected() {
        let mut descriptor =
            SizedSendDescriptor::new(1, 100, Box::new(|_offset: u32, _buf: &mut [u8]| 0));
        assert!(!descriptor.is_cancelled());
        descriptor.cancelled_by_peer = true;
        assert!(descriptor.is_cancelled());
    }
}
