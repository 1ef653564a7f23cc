//! Big-data (0x08/0x09) stream reassembly (§4.3, §9 "Big-data buffer").
//!
//! Unlike sized-data, a big-data stream carries no length prefix: the
//! receiver just keeps appending until the terminal 0x09 fragment arrives,
//! bounded by `MaxBigPacket` so a hostile or buggy peer can't grow the
//! buffer without limit.

use crate::error::BigRecvError;

/// Accumulates a single in-flight big-data stream for one connection.
///
/// Only one assembly may be in flight per connection at a time (§3); the
/// owning connection enforces that by construction, since reliable delivery
/// order guarantees a 0x09 for one stream is processed before the next
/// stream's 0x08 arrives.
#[derive(Debug, Clone, Default)]
pub struct BigRecv {
    buf: Vec<u8>,
}

impl BigRecv {
    /// Creates an empty assembly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been appended yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends a non-terminal (0x08) fragment.
    ///
    /// # Errors
    ///
    /// Errors if appending `fragment` would push the assembly past `max`
    /// bytes; the caller should release the buffer in that case.
    pub fn append(&mut self, fragment: &[u8], max: usize) -> Result<(), BigRecvError> {
        let would_be = self.buf.len() + fragment.len();
        if would_be > max {
            return Err(BigRecvError::TooLarge { would_be, max });
        }
        self.buf.extend_from_slice(fragment);
        Ok(())
    }

    /// Appends the terminal (0x09) fragment and returns the completed
    /// stream, resetting this assembler for reuse.
    ///
    /// # Errors
    ///
    /// Errors under the same condition as [`BigRecv::append`].
    pub fn finish(&mut self, fragment: &[u8], max: usize) -> Result<Vec<u8>, BigRecvError> {
        self.append(fragment, max)?;
        Ok(std::mem::take(&mut self.buf))
    }

    /// Discards any partial assembly, e.g. after a `BigRecvError` or a
    /// connection teardown.
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_exact_bytes_across_fragments() {
        let mut recv = BigRecv::new();
        recv.append(b"hello, ", 1024).unwrap();
        let whole = recv.finish(b"world!", 1024).unwrap();
        assert_eq!(b"hello, world!", whole.as_slice());
    }

    #[test]
    fn single_fragment_stream() {
        let mut recv = BigRecv::new();
        let whole = recv.finish(b"solo", 1024).unwrap();
        assert_eq!(b"solo", whole.as_slice());
    }

    #[test]
    fn rejects_once_max_would_be_exceeded() {
        let mut recv = BigRecv::new();
        recv.append(&[0u8; 8], 10).unwrap();
        let err = recv.append(&[0u8; 8], 10).unwrap_err();
        assert!(matches!(
            err,
            BigRecvError::TooLarge { would_be: 16, max: 10 }
        ));
    }

    #[test]
    fn reset_clears_a_partial_assembly() {
        let mut recv = BigRecv::new();
        recv.append(b"partial", 1024).unwrap();
        recv.reset();
        assert!(recv.is_empty());
    }

    #[test]
    fn many_small_fragments_reassemble_in_order() {
        let mut recv = BigRecv::new();
        let chunks: Vec<Vec<u8>> = (0u8..10).map(|b| vec![b; 120]).collect();
        for chunk in &chunks[..chunks.len() - 1] {
            recv.append(chunk, 4096).unwrap();
        }
        let whole = recv.finish(chunks.last().unwrap(), 4096).unwrap();
        assert_eq!(1200, whole.len());
        let expected: Vec<u8> = chunks.into_iter().flatten().collect();
        assert_eq!(expected, whole);
    }
}
