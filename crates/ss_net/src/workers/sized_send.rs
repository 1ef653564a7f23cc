//! The sized-send worker (§4.5 "Sized-Send Engine").

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use ss_core::{constants::CHUNK_SIZE, header::core_prefix, CoreSubtype};

use crate::{conn::ConnData, config::Config, state::ConnState, workers::send::SendWorker};

/// How long a worker blocks on the signal channel before re-checking the
/// cancellation flag, matching the 1s upper bound named elsewhere for
/// cooperative shutdown.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Placeholder left in a descriptor's `provider` slot while the real one is
/// on loan to an unlocked `provide` call.
fn no_op_provider(_offset: u32, _buf: &mut [u8]) -> usize {
    0
}

/// Drives the dedicated sized-send worker described in §4.5.
///
/// One worker services every connection with pending sized sends,
/// dequeuing from a shared signal channel rather than polling every
/// connection each tick, since sized transfers are comparatively rare.
pub struct SizedSendWorker {
    config: Arc<Config>,
    signal: Receiver<Arc<ConnData>>,
    /// Clone of the same channel's sender, used both to requeue a
    /// connection that's still over the queue threshold and, via the
    /// per-chunk ACK callback, to wake the worker again once capacity
    /// frees up (§4.5 step 5).
    resignal: Sender<Arc<ConnData>>,
    /// Handle onto the send worker, used to drain `unsent_rel_out`
    /// immediately after enqueuing a chunk when
    /// [`Config::sized_send_outgoing`] is set, rather than waiting for the
    /// send worker's own ~10ms tick.
    send_worker: Arc<SendWorker>,
    cancel: Arc<AtomicBool>,
}

impl SizedSendWorker {
    /// Creates a new sized-send worker draining `signal`, resignaling itself
    /// (or being resignaled by a chunk's ACK callback) via `resignal`.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        signal: Receiver<Arc<ConnData>>,
        resignal: Sender<Arc<ConnData>>,
        send_worker: Arc<SendWorker>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            signal,
            resignal,
            send_worker,
            cancel,
        }
    }

    /// Runs the worker loop until the cancellation flag is set.
    pub fn run(&self) {
        log::info!(target: "ss_net::sized_send", "sized-send worker starting");
        while !self.cancel.load(Ordering::Relaxed) {
            match self.signal.recv_timeout(RECV_TIMEOUT) {
                Ok(conn) => self.service_connection(&conn),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!(target: "ss_net::sized_send", "sized-send worker stopping");
    }

    fn service_connection(&self, conn: &Arc<ConnData>) {
        let state = *conn.state.lock();

        let cancelled_or_timewait = {
            let mut sized_send = conn.sized_send.lock();
            let Some(descriptor) = sized_send.sends.front() else {
                return;
            };
            let cancelled = descriptor.is_cancelled();
            let time_wait = matches!(state, ConnState::TimeWait { .. });
            if cancelled || time_wait {
                let peer_cancelled = descriptor.cancelled_by_peer;
                sized_send.sends.pop_front();
                Some((peer_cancelled, time_wait))
            } else {
                None
            }
        };

        if let Some((peer_cancelled, time_wait)) = cancelled_or_timewait {
            if peer_cancelled {
                self.send_sized_cancelled(conn, time_wait);
            }
            if !conn.sized_send.lock().sends.is_empty() {
                let _ = self.resignal.try_send(Arc::clone(conn));
            }
            return;
        }

        if conn.sized_send.lock().queued_count >= self.config.sized_queue_threshold {
            return;
        }

        // Borrow the provider out of the descriptor so `provide` (which may do
        // I/O) runs with no connection lock held, per the provider's own
        // contract. Only this worker ever pops `sends.front()`, so the
        // descriptor is guaranteed to still be there when we write the
        // provider back below.
        let (offset, needed, mut provider) = {
            let mut sized_send = conn.sized_send.lock();
            let descriptor = sized_send.sends.front_mut().expect("checked Some above");
            let needed = (self.config.sized_queue_packets * CHUNK_SIZE).min(descriptor.remaining() as usize);
            let provider = std::mem::replace(&mut descriptor.provider, Box::new(no_op_provider));
            (descriptor.offset, needed, provider)
        };

        let mut scratch = vec![0u8; needed];
        let produced = provider.provide(offset, &mut scratch);
        scratch.truncate(produced);

        let (payload_type, total_len, finished) = {
            let mut sized_send = conn.sized_send.lock();
            let Some(descriptor) = sized_send.sends.front_mut() else {
                return;
            };
            descriptor.provider = provider;
            if descriptor.is_cancelled() || matches!(*conn.state.lock(), ConnState::TimeWait { .. }) {
                return;
            }
            #[expect(clippy::cast_possible_truncation, reason = "produced is bounded by needed, itself derived from remaining() and a u32 total")]
            {
                descriptor.offset = offset + produced as u32;
            }
            (descriptor.payload_type, descriptor.total_len, descriptor.is_done())
        };

        for chunk in scratch.chunks(CHUNK_SIZE) {
            self.enqueue_chunk(conn, payload_type, total_len, offset, chunk);
        }

        if finished {
            let descriptor = conn.sized_send.lock().sends.pop_front();
            if let Some(mut descriptor) = descriptor {
                let _ = descriptor.provider.provide(descriptor.total_len, &mut []);
                if !conn.sized_send.lock().sends.is_empty() {
                    let _ = self.resignal.try_send(Arc::clone(conn));
                }
            }
        }
    }

    fn enqueue_chunk(&self, conn: &Arc<ConnData>, payload_type: u8, total_len: u32, offset: u32, chunk: &[u8]) {
        let mut bytes = Vec::with_capacity(6 + chunk.len());
        bytes.extend_from_slice(&total_len.to_le_bytes());
        bytes.push(payload_type);
        bytes.extend_from_slice(chunk);

        conn.sized_send.lock().queued_count += 1;

        let conn_for_callback = Arc::clone(conn);
        let resignal = self.resignal.clone();
        let mut unsent = crate::conn::UnsentReliable {
            bytes,
            callbacks: ss_core::CallbackChain::new(),
        };
        unsent.callbacks.push(Box::new(move |_success: bool| {
            let mut sized_send = conn_for_callback.sized_send.lock();
            sized_send.queued_count = sized_send.queued_count.saturating_sub(1);
            drop(sized_send);
            let _ = resignal.try_send(Arc::clone(&conn_for_callback));
        }));
        conn.outgoing.lock().unsent_rel_out.push_back(unsent);
        log::trace!(target: "ss_net::sized_send", "enqueued sized chunk for {} at offset {offset}", conn.remote_address);

        if self.config.sized_send_outgoing {
            self.send_worker.promote_unsent_reliable(conn);
            self.send_worker.service_outlist(conn, Instant::now());
        }
    }

    fn send_sized_cancelled(&self, conn: &Arc<ConnData>, time_wait: bool) {
        let bytes = core_prefix(CoreSubtype::SizedCancelled);
        if time_wait {
            conn.raw_send(&bytes);
        } else {
            conn.outgoing
                .lock()
                .unsent_rel_out
                .push_back(crate::conn::UnsentReliable {
                    bytes: bytes.to_vec(),
                    callbacks: ss_core::CallbackChain::new(),
                });
        }
    }
}
