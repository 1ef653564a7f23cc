//! Connection table, core packet dispatcher, and worker loops for the
//! Subspace core transport (§2 "System overview", §4 "Component design").
//!
//! [`ss_core`] supplies the wire framing, sequencing, and bandwidth policy;
//! this crate is the facade a module host embeds: it owns the endpoint
//! tables, starts the four worker threads (receive, send, sized-send,
//! reliable), and exposes the application-inbound handler registries
//! ([`handlers`]) and application-outbound send API ([`api`]) named in §6.

pub mod api;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod limit_factory;
pub mod outbound;
pub mod outbound_client;
pub mod ping;
pub mod sized_send;
pub mod state;
pub mod stats;
pub mod table;
pub mod workers;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use ss_io::{EncryptionHook, RemoteAddr, Socket};

use crate::{
    config::Config,
    conn::ConnData,
    dispatch::Dispatcher,
    handlers::Handlers,
    limit_factory::LimiterFactory,
    ping::PingResponder,
    table::EndpointTable,
    workers::{recv::RecvWorker, reliable::ReliableWorker, send::SendWorker, sized_send::SizedSendWorker},
};

/// Per-connection grouper budget: room for a `0x00 0x0E` container up to
/// [`ss_core::constants::MAX_GROUPED_PACKET_LEN`], header excluded.
const GROUPER_CAP: usize = ss_core::constants::MAX_GROUPED_PACKET_LEN - 2;

/// Bound on the reliable-delivery signal channel (§4.6 "bounded-capacity
/// signal queue").
const RELIABLE_SIGNAL_CAPACITY: usize = 1024;

/// Ties the endpoint tables, dispatcher, handler registries, and worker
/// threads into one running transport.
///
/// Constructed once via [`Transport::new`]; application code registers
/// handlers through [`Transport::handlers`] and sends through the
/// `send_*`/`stats` methods in [`api`].
pub struct Transport {
    config: Arc<Config>,
    player_table: Arc<EndpointTable>,
    outbound_table: Arc<EndpointTable>,
    handlers: Arc<Handlers>,
    limiter_factory: Arc<dyn LimiterFactory>,
    sized_send_signal: crossbeam_channel::Sender<Arc<ConnData>>,
    cancel: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Starts every worker thread and returns the running transport.
    ///
    /// `on_disconnect`, if given, is called once per connection as it's
    /// kicked or drops (from whichever worker thread observed it first) —
    /// keep it cheap and thread-safe.
    #[must_use]
    pub fn new(
        config: Config,
        game_socket: Arc<Socket>,
        ping_socket: Option<Arc<Socket>>,
        ping_responder: Option<Arc<PingResponder>>,
        limiter_factory: Arc<dyn LimiterFactory>,
        on_disconnect: Option<Arc<dyn Fn(RemoteAddr) + Send + Sync>>,
    ) -> Self {
        let config = Arc::new(config);
        let player_table = Arc::new(EndpointTable::new());
        let outbound_table = Arc::new(EndpointTable::new());
        let handlers = Arc::new(Handlers::new());

        let (reliable_tx, reliable_rx) = crossbeam_channel::bounded(RELIABLE_SIGNAL_CAPACITY);
        let (sized_tx, sized_rx) = crossbeam_channel::unbounded();

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&handlers),
            config.max_big_packet,
            Instant::now(),
            reliable_tx.clone(),
            sized_tx.clone(),
            on_disconnect.clone(),
        ));

        let cancel = Arc::new(AtomicBool::new(false));
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        let recv = RecvWorker::new(
            Arc::clone(&game_socket),
            ping_socket,
            Arc::clone(&player_table),
            Arc::clone(&outbound_table),
            Arc::clone(&handlers),
            Arc::clone(&dispatcher),
            ping_responder,
            Arc::clone(&cancel),
        );
        workers.push(thread::spawn(move || recv.run()));

        let send = Arc::new(SendWorker::new(
            Arc::clone(&player_table),
            Arc::clone(&outbound_table),
            Arc::clone(&config),
            sized_tx.clone(),
            on_disconnect,
            Arc::clone(&cancel),
        ));
        let send_for_worker = Arc::clone(&send);
        workers.push(thread::spawn(move || send.run()));

        let sized = SizedSendWorker::new(
            Arc::clone(&config),
            sized_rx,
            sized_tx.clone(),
            send_for_worker,
            Arc::clone(&cancel),
        );
        workers.push(thread::spawn(move || sized.run()));

        for _ in 0..config.reliable_threads.max(1) {
            let reliable = ReliableWorker::new(
                Arc::clone(&dispatcher),
                reliable_rx.clone(),
                reliable_tx.clone(),
                Arc::clone(&cancel),
            );
            workers.push(thread::spawn(move || reliable.run()));
        }

        Self {
            config,
            player_table,
            outbound_table,
            handlers,
            limiter_factory,
            sized_send_signal: sized_tx,
            cancel,
            workers,
        }
    }

    /// The application-inbound handler registries (§6).
    #[must_use]
    pub fn handlers(&self) -> &Arc<Handlers> {
        &self.handlers
    }

    /// The running configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a new inbound connection in the player table.
    ///
    /// Called from inside a [`handlers::ConnectionInitHandler`] once it
    /// decides to accept a peer (§4.2 step 2); the handler itself still owns
    /// negotiating encryption and replying with the `0x02` key response.
    /// Mirrors [`outbound_client::make_client_connection`]'s construction
    /// for the inbound side.
    #[must_use]
    pub fn accept_connection(
        &self,
        socket: Arc<Socket>,
        remote: RemoteAddr,
        encryption_hook: Option<Arc<dyn EncryptionHook>>,
    ) -> Arc<ConnData> {
        let conn = Arc::new(ConnData::new(
            remote,
            socket,
            self.config.reliable_window,
            self.limiter_factory.make(),
            GROUPER_CAP,
            encryption_hook,
        ));
        self.player_table.insert(Arc::clone(&conn));
        conn
    }

    /// Starts an outbound-client handshake, registering the connection in
    /// the outbound-client table (§4.7).
    #[must_use]
    pub fn connect(
        &self,
        socket: Arc<Socket>,
        remote: RemoteAddr,
        encryption_hook: Option<Arc<dyn EncryptionHook>>,
    ) -> Arc<ConnData> {
        outbound_client::make_client_connection(
            &self.outbound_table,
            socket,
            remote,
            self.config.reliable_window,
            self.limiter_factory.as_ref(),
            GROUPER_CAP,
            encryption_hook,
        )
    }

    /// Signals every worker thread to stop and joins them.
    pub fn shutdown(self) {
        self.cancel.store(true, Ordering::Relaxed);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}
