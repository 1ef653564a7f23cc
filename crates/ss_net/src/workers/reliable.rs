//! The reliable receive worker (§4.6).

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};

use crate::{conn::ConnData, dispatch::Dispatcher};

/// How long a worker blocks on the signal channel before re-checking the
/// cancellation flag.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Delivers in-order reliable payloads for connections signalled by
/// [`Dispatcher::handle_reliable`](crate::dispatch::Dispatcher) as having
/// their next expected sequence number ready.
///
/// One or more of these can run concurrently; `ConnData::reliable_processing`
/// guarantees at most one worker ever walks a given connection's receive
/// window at a time, so adding workers only spreads load across connections,
/// never parallelises one connection's delivery order.
pub struct ReliableWorker {
    dispatcher: Arc<Dispatcher>,
    signal: Receiver<Arc<ConnData>>,
    /// Clone of the signal channel's sender, used to re-queue a connection
    /// whose receive window still has contiguous data ready after a full
    /// visit, so other signalled connections get a turn first.
    resignal: Sender<Arc<ConnData>>,
    cancel: Arc<AtomicBool>,
}

impl ReliableWorker {
    /// Creates a worker draining `signal` and wired to `dispatcher` for
    /// delivery.
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        signal: Receiver<Arc<ConnData>>,
        resignal: Sender<Arc<ConnData>>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            dispatcher,
            signal,
            resignal,
            cancel,
        }
    }

    /// Runs the worker loop until the cancellation flag is set.
    pub fn run(&self) {
        log::info!(target: "ss_net::reliable", "reliable worker starting");
        while !self.cancel.load(Ordering::Relaxed) {
            match self.signal.recv_timeout(RECV_TIMEOUT) {
                Ok(conn) => self.service_connection(&conn),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        log::info!(target: "ss_net::reliable", "reliable worker stopping");
    }

    /// One visit: drains every contiguously-ready payload and delivers each
    /// in order, then re-signals if the window still has more ready.
    fn service_connection(&self, conn: &Arc<ConnData>) {
        let Some(_processing) = conn.reliable_processing.try_lock() else {
            // Another worker is already walking this connection's window;
            // that visit will cover whatever this signal was raised for.
            return;
        };

        // One lock acquisition drains the whole visit (bounded at the
        // window's capacity by `ReliableRecvWindow::drain`); the relbuf lock
        // is not held while `deliver_reliable_payload` runs below.
        let drained = {
            let mut reliable = conn.reliable.lock();
            reliable.window.drain()
        };

        for payload in &drained {
            self.dispatcher.deliver_reliable_payload(conn, payload);
        }

        if conn.reliable.lock().window.has_head() {
            let _ = self.resignal.try_send(Arc::clone(conn));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::Handlers;
    use ss_core::{Seq, TokenBucketLimiter};
    use ss_io::{RemoteAddr, Socket};
    use std::{net::SocketAddr, time::Instant};

    fn make_conn() -> Arc<ConnData> {
        let socket = Arc::new(Socket::bind("127.0.0.1:0").unwrap());
        let remote: SocketAddr = "127.0.0.1:1".parse().unwrap();
        Arc::new(ConnData::new(
            RemoteAddr::from(remote),
            socket,
            64,
            Box::new(TokenBucketLimiter::new(10_000, 520)),
            510,
            None,
        ))
    }

    fn make_dispatcher() -> (Arc<Dispatcher>, Receiver<Arc<ConnData>>, Sender<Arc<ConnData>>) {
        let (rel_tx, rel_rx) = crossbeam_channel::unbounded();
        let (sized_tx, _sized_rx) = crossbeam_channel::unbounded();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(Handlers::new()),
            1 << 20,
            Instant::now(),
            rel_tx,
            sized_tx,
            None,
        ));
        (dispatcher, rel_rx, crossbeam_channel::unbounded().0)
    }

    fn offer(conn: &Arc<ConnData>, seq: u32, payload: &[u8]) {
        let mut reliable = conn.reliable.lock();
        reliable
            .window
            .offer(Seq::new(seq as i32), payload.to_vec());
    }

    #[test]
    fn delivers_in_order_payload_to_application_handler() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let handlers = Arc::new(Handlers::new());
        handlers.register_packet_handler(
            0x42,
            Arc::new(move |_remote: RemoteAddr, body: &[u8]| {
                seen2.lock().unwrap().push(body.to_vec());
            }),
        );
        let (rel_tx, rel_rx) = crossbeam_channel::unbounded();
        let (sized_tx, _) = crossbeam_channel::unbounded();
        let dispatcher = Arc::new(Dispatcher::new(
            handlers,
            1 << 20,
            Instant::now(),
            rel_tx,
            sized_tx,
            None,
        ));

        let conn = make_conn();
        offer(&conn, 0, &[0x42, 0xAA, 0xBB]);

        let (resignal_tx, _resignal_rx) = crossbeam_channel::unbounded();
        let worker = ReliableWorker::new(dispatcher, rel_rx, resignal_tx, Arc::new(AtomicBool::new(false)));
        worker.service_connection(&conn);

        assert_eq!(vec![vec![0xAA, 0xBB]], *seen.lock().unwrap());
        assert_eq!(Seq::new(1), conn.reliable.lock().window.c2sn());
    }

    #[test]
    fn gap_leaves_window_undrained_and_does_not_resignal() {
        let (dispatcher, rel_rx, _unused_tx) = make_dispatcher();
        let conn = make_conn();
        offer(&conn, 1, b"second");

        let (resignal_tx, resignal_rx) = crossbeam_channel::unbounded();
        let worker = ReliableWorker::new(dispatcher, rel_rx, resignal_tx, Arc::new(AtomicBool::new(false)));
        worker.service_connection(&conn);

        assert_eq!(Seq::new(0), conn.reliable.lock().window.c2sn());
        assert!(resignal_rx.try_recv().is_err());
    }

    #[test]
    fn remaining_head_after_visit_resignals_connection() {
        let (dispatcher, rel_rx, _unused_tx) = make_dispatcher();
        let conn = make_conn();
        offer(&conn, 0, b"a");
        // Fill the rest of the window's capacity so `drain()` stops at its
        // W-iteration cap rather than a gap, then immediately offer one more
        // so `has_head()` is true again once that cap is hit.
        for i in 1..64 {
            offer(&conn, i, b"x");
        }

        let (resignal_tx, resignal_rx) = crossbeam_channel::unbounded();
        let worker = ReliableWorker::new(dispatcher, rel_rx, resignal_tx, Arc::new(AtomicBool::new(false)));
        worker.service_connection(&conn);

        assert_eq!(Seq::new(64), conn.reliable.lock().window.c2sn());
        assert!(resignal_rx.try_recv().is_err());
    }

    #[test]
    fn second_worker_skips_connection_already_being_processed() {
        let (dispatcher, rel_rx, _unused_tx) = make_dispatcher();
        let conn = make_conn();
        offer(&conn, 0, b"a");

        let _held = conn.reliable_processing.lock();
        let (resignal_tx, _resignal_rx) = crossbeam_channel::unbounded();
        let worker = ReliableWorker::new(dispatcher, rel_rx, resignal_tx, Arc::new(AtomicBool::new(false)));
        worker.service_connection(&conn);

        // Still undrained: the worker bailed out on the contended lock.
        assert_eq!(Seq::new(0), conn.reliable.lock().window.c2sn());
    }
}
