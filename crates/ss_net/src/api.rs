//! The application-outbound interface (§6 "Application-outbound interface").
//!
//! Every method here resolves a [`RemoteAddr`] against both endpoint tables
//! (inbound players and outbound-client connections) the same way the
//! receive worker does, then either buffers the payload directly or, for
//! oversized payloads, splits it into a big-data fragment stream — all
//! under one hold of the connection's `outgoing` lock per §4.4's
//! "SendToOne / SendToSet / SendToArena / SendToTarget".
//!
//! Arena and player-set membership are the module host's own data (§1
//! non-goals: this crate owns no arena/player store), so `send_to_set`,
//! `send_to_arena`, and `send_to_target` all take an explicit list of
//! already-resolved targets rather than resolving membership themselves.

use std::{collections::VecDeque, sync::Arc};

use ss_core::{
    constants::{CHUNK_SIZE, MAX_PACKET, RELIABLE_HEADER_LEN},
    header::core_prefix,
    CallbackChain, CoreSubtype,
};
use ss_io::RemoteAddr;

use crate::{
    conn::{ConnData, UnsentReliable},
    error::SendError,
    outbound::{OutboundBuffer, SendFlags},
    sized_send::{SizedSendDescriptor, SizedSendProvider},
    Transport,
};

impl Transport {
    /// Sends `bytes` to one connection.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NoSuchConnection`] if `target` isn't a known
    /// endpoint, or [`SendError::OutlistFull`] if its outbound queue is
    /// already at [`crate::config::Config::max_outlist_size`].
    pub fn send_to_one(&self, target: RemoteAddr, bytes: &[u8], flags: SendFlags) -> Result<(), SendError> {
        let conn = self.find_conn(target).ok_or(SendError::NoSuchConnection)?;
        self.enqueue(&conn, bytes, flags, CallbackChain::new())
    }

    /// Sends the same `bytes` to every connection in `targets`.
    ///
    /// Each target is resolved and enqueued independently; one missing or
    /// overloaded connection doesn't stop delivery to the rest.
    pub fn send_to_set(
        &self,
        targets: impl IntoIterator<Item = RemoteAddr>,
        bytes: &[u8],
        flags: SendFlags,
    ) -> Vec<(RemoteAddr, Result<(), SendError>)> {
        targets
            .into_iter()
            .map(|target| (target, self.send_to_one(target, bytes, flags)))
            .collect()
    }

    /// Sends `bytes` to every connection in `members`, an arena's already-
    /// resolved player list.
    ///
    /// Arena membership itself is the module host's data; this is a named
    /// alias of [`Transport::send_to_set`] for parity with §6's four-call
    /// interface (see `DESIGN.md`).
    pub fn send_to_arena(
        &self,
        members: impl IntoIterator<Item = RemoteAddr>,
        bytes: &[u8],
        flags: SendFlags,
    ) -> Vec<(RemoteAddr, Result<(), SendError>)> {
        self.send_to_set(members, bytes, flags)
    }

    /// Sends `bytes` to every connection in `resolved_target`, a caller-
    /// resolved `Target` (player, freq, arena, or zone) membership list.
    ///
    /// Resolving a `Target` enum into a player list is the module host's
    /// job, same as arena membership; see [`Transport::send_to_arena`].
    pub fn send_to_target(
        &self,
        resolved_target: impl IntoIterator<Item = RemoteAddr>,
        bytes: &[u8],
        flags: SendFlags,
    ) -> Vec<(RemoteAddr, Result<(), SendError>)> {
        self.send_to_set(resolved_target, bytes, flags)
    }

    /// Sends `bytes` reliably, firing `cb(success)` exactly once after the
    /// matching ACK arrives or the buffer is abandoned (teardown, eviction).
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotReliable`] if `flags.reliable` is false,
    /// since a callback has nothing to fire on for an unacknowledged send.
    pub fn send_with_callback<F>(
        &self,
        target: RemoteAddr,
        bytes: &[u8],
        flags: SendFlags,
        cb: F,
    ) -> Result<(), SendError>
    where
        F: FnOnce(RemoteAddr, bool) + Send + 'static,
    {
        if !flags.reliable {
            return Err(SendError::NotReliable);
        }
        let conn = self.find_conn(target).ok_or(SendError::NoSuchConnection)?;
        let mut callbacks = CallbackChain::new();
        callbacks.push(Box::new(move |success: bool| cb(target, success)));
        self.enqueue(&conn, bytes, flags, callbacks)
    }

    /// Initiates an outbound sized stream: `provider` is polled for bytes by
    /// the sized-send worker, chunked, and delivered reliably (§4.5).
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NoSuchConnection`] if `target` isn't known.
    pub fn send_sized(
        &self,
        target: RemoteAddr,
        payload_type: u8,
        total_len: u32,
        provider: impl SizedSendProvider + 'static,
    ) -> Result<(), SendError> {
        let conn = self.find_conn(target).ok_or(SendError::NoSuchConnection)?;
        let descriptor = SizedSendDescriptor::new(payload_type, total_len, Box::new(provider));
        conn.sized_send.lock().sends.push_back(descriptor);
        let _ = self.sized_send_signal.try_send(Arc::clone(&conn));
        Ok(())
    }

    /// Returns a point-in-time stats snapshot for one connection (§6 "Stats
    /// and last-packet query").
    #[must_use]
    pub fn stats(&self, target: RemoteAddr) -> Option<crate::stats::ConnStats> {
        self.find_conn(target).map(|conn| conn.stats())
    }

    fn find_conn(&self, target: RemoteAddr) -> Option<Arc<ConnData>> {
        self.player_table
            .get(target)
            .or_else(|| self.outbound_table.get(target))
    }

    /// Buffers `bytes` for `conn`, splitting into a reliable big-data
    /// fragment stream if it exceeds `MaxPacket` (minus the reliable header
    /// when the caller asked for a reliable send), all under one hold of
    /// the connection's `outgoing` lock (§4.4).
    fn enqueue(
        &self,
        conn: &Arc<ConnData>,
        bytes: &[u8],
        flags: SendFlags,
        callbacks: CallbackChain,
    ) -> Result<(), SendError> {
        let effective_max = if flags.reliable {
            MAX_PACKET - RELIABLE_HEADER_LEN
        } else {
            MAX_PACKET
        };

        let mut outgoing = conn.outgoing.lock();
        let queued = outgoing.outlist.iter().map(VecDeque::len).sum::<usize>() + outgoing.unsent_rel_out.len();
        if queued >= self.config.max_outlist_size {
            return Err(SendError::OutlistFull);
        }

        if bytes.len() <= effective_max {
            if flags.reliable {
                outgoing.unsent_rel_out.push_back(UnsentReliable {
                    bytes: bytes.to_vec(),
                    callbacks,
                });
            } else {
                let mut buf = OutboundBuffer::new(bytes.to_vec(), flags);
                buf.callbacks = callbacks;
                outgoing.outlist[flags.priority as usize].push_back(buf);
            }
            return Ok(());
        }

        // Oversized: split into ChunkSize 0x08 fragments plus a terminal
        // 0x09, always sent reliably regardless of `flags.reliable` (§4.4).
        let mut chunks = bytes.chunks(CHUNK_SIZE).peekable();
        while let Some(chunk) = chunks.next() {
            let subtype = if chunks.peek().is_some() {
                CoreSubtype::BigData
            } else {
                CoreSubtype::BigDataEnd
            };
            let mut wire = core_prefix(subtype).to_vec();
            wire.extend_from_slice(chunk);
            outgoing.unsent_rel_out.push_back(UnsentReliable {
                bytes: wire,
                callbacks: CallbackChain::new(),
            });
        }
        if !callbacks.is_empty() {
            if let Some(last) = outgoing.unsent_rel_out.back_mut() {
                last.callbacks = callbacks;
            }
        }
        Ok(())
    }
}
