//! Outbound grouping (`0x00 0x0E`) and decoding of inbound grouped
//! containers (§4.3, §4.4).

use crate::{constants::MAX_GROUPED_ITEM_LEN, error::DecodeError, subtype::CoreSubtype};

/// Accumulates outbound items into a single grouped container, flushing
/// either a standalone packet (one item) or a `0x00 0x0E` frame (two or
/// more), per §4.4's "Outbound grouping".
#[derive(Debug, Clone)]
pub struct Grouper {
    items: Vec<Vec<u8>>,
    /// Bytes the buffered items would occupy inside a grouped container,
    /// i.e. `sum(len(item) + 1)`, not counting the 2-byte `0x00 0x0E`
    /// header itself.
    used: usize,
    cap: usize,
}

impl Grouper {
    /// Creates an empty grouper with room for `cap` bytes of items (length
    /// prefixes included) inside the eventual container.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            items: Vec::new(),
            used: 0,
            cap,
        }
    }

    /// Whether no items are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Attempts to append `item` to the current group.
    ///
    /// Returns `false` (and leaves the grouper untouched) if `item` is
    /// longer than [`MAX_GROUPED_ITEM_LEN`] or doesn't fit in the remaining
    /// budget; the caller should flush first and retry on a fresh grouper
    /// in that case.
    pub fn try_append(&mut self, item: &[u8]) -> bool {
        if item.len() > MAX_GROUPED_ITEM_LEN {
            return false;
        }
        let needed = item.len() + 1;
        if self.used + needed > self.cap {
            return false;
        }
        self.used += needed;
        self.items.push(item.to_vec());
        true
    }

    /// Emits the buffered items as a single packet and resets the grouper.
    ///
    /// A single buffered item is emitted standalone (no grouped-container
    /// header); two or more are emitted as one `0x00 0x0E` frame.
    #[must_use]
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        match self.items.len() {
            0 => None,
            1 => Some(self.items.pop().expect("checked len == 1")),
            _ => {
                let mut out = Vec::with_capacity(2 + self.used);
                out.push(crate::constants::CORE_TYPE);
                out.push(CoreSubtype::Grouped.to_byte());
                for item in self.items.drain(..) {
                    #[expect(clippy::cast_possible_truncation, reason = "item.len() <= MAX_GROUPED_ITEM_LEN")]
                    out.push(item.len() as u8);
                    out.extend_from_slice(&item);
                }
                self.used = 0;
                Some(out)
            }
        }
    }
}

/// Splits a `0x00 0x0E` container's payload (everything after the 2-byte
/// subtype header) into its length-prefixed items.
///
/// # Errors
///
/// Errors if a length byte claims more bytes than remain in the buffer.
pub fn decode_items(mut payload: &[u8]) -> Result<Vec<&[u8]>, DecodeError> {
    let mut items = Vec::new();
    while !payload.is_empty() {
        let len = payload[0] as usize;
        payload = &payload[1..];
        if len > payload.len() {
            return Err(DecodeError::GroupedItemOverrun {
                len,
                rem: payload.len(),
            });
        }
        let (item, rest) = payload.split_at(len);
        items.push(item);
        payload = rest;
    }
    Ok(items)
}
