//! Peer connections: the byte-stream façade over the datagram machinery.
//!
//! An [`RdtStream`] is one established, bidirectional logical connection.
//! Outbound streams ([`RdtStream::connect`]) own their socket and run their
//! own background receive loop; streams accepted by a rendezvous listener
//! share the listener's socket and are fed by the listener's loop instead.
//!
//! All window mutations driven by inbound traffic happen on the receive
//! loop; mutations driven by `write`/`flush` happen on the caller's task.
//! The window state behind its mutex is the only ground both sides touch.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use tracing::{debug, trace};

use crate::config::{Direction, RdtConfig};
use crate::diagram::{Diagram, MAX_RAW_LEN};
use crate::error::{RdtError, Result};
use crate::loss::LossDice;
use crate::window::recv::RecvWindow;
use crate::window::send::{AckOutcome, SendWindow};

/// Shared state of one peer connection.
pub(crate) struct PeerInner {
    pub(crate) config: RdtConfig,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) remote: SocketAddr,
    /// Whether this peer owns `socket` outright (outbound connection) or
    /// borrows a rendezvous listener's socket.
    pub(crate) owns_socket: bool,
    loss: LossDice,
    send: Mutex<SendWindow>,
    recv: Mutex<RecvWindow>,
    /// Payloads ready for the application, in delivery order.
    deliverable: SegQueue<Bytes>,
    /// Residue of a partially-read payload, drained ahead of the queue.
    leftover: Mutex<Bytes>,
    /// Datagrams resent by the flush scan since the connection opened.
    retransmissions: AtomicU64,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerInner {
    pub(crate) fn new(
        config: RdtConfig,
        socket: Arc<UdpSocket>,
        remote: SocketAddr,
        owns_socket: bool,
        loss: LossDice,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            send: Mutex::new(SendWindow::new(config.send_window)),
            recv: Mutex::new(RecvWindow::new(config.recv_window)),
            config,
            socket,
            remote,
            owns_socket,
            loss,
            deliverable: SegQueue::new(),
            leftover: Mutex::new(Bytes::new()),
            retransmissions: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown,
            listen_task: Mutex::new(None),
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Flip to closed and wake the loops. Returns whether this call did
    /// the flip.
    pub(crate) fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            let _ = self.shutdown.send(true);
        }
        first
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    fn can_read(&self) -> bool {
        !self.is_closed() && self.config.direction != Direction::SenderOnly
    }

    fn can_write(&self) -> bool {
        !self.is_closed() && self.config.direction != Direction::ReceiverOnly
    }

    /// Transmit one raw diagram to the remote, subject to the loss dice.
    pub(crate) async fn send_raw(&self, diagram: &Diagram) {
        send_raw_to(&self.socket, &self.loss, diagram, self.remote).await;
    }

    /// Mark closed and announce the disconnect to the remote. Safe to call
    /// repeatedly; only the first call transmits.
    pub(crate) async fn shutdown_with_disconnect(&self) {
        if !self.mark_closed() {
            return;
        }
        self.send_raw(&Diagram::disconnect_request()).await;
    }

    /// Window/ledger reaction to one inbound data or acknowledgment
    /// diagram. Runs on the receive loop responsible for this peer's
    /// traffic.
    pub(crate) async fn handle_diagram(&self, diagram: Diagram) {
        if diagram.is_ack {
            let outcome = self
                .send
                .lock()
                .apply_ack(diagram.sequence, diagram.is_cumulative());
            if outcome == AckOutcome::Ignored {
                trace!(
                    sequence = diagram.sequence,
                    remote = %self.remote,
                    "stale acknowledgment ignored"
                );
            }
            return;
        }
        if !self.can_read() {
            return;
        }
        let outcome = self.recv.lock().accept(diagram);
        for payload in outcome.delivered {
            self.deliverable.push(payload);
        }
        if let Some(reply) = outcome.reply {
            self.send_raw(&reply).await;
        }
    }
}

/// Transmit one raw diagram, rolling the loss dice first. A failed send is
/// a transient fault: logged and skipped, the retransmission scan is the
/// recovery path.
pub(crate) async fn send_raw_to(
    socket: &UdpSocket,
    loss: &LossDice,
    diagram: &Diagram,
    target: SocketAddr,
) {
    if loss.roll() {
        trace!(
            sequence = diagram.sequence,
            ack = diagram.is_ack,
            %target,
            "outgoing datagram dropped by loss injection"
        );
        return;
    }
    match socket.send_to(&diagram.encode(), target).await {
        Ok(_) => trace!(
            sequence = diagram.sequence,
            ack = diagram.is_ack,
            %target,
            "datagram sent"
        ),
        Err(error) => debug!(
            %target,
            %error,
            "datagram send failed; retransmission will recover"
        ),
    }
}

/// A reliable, ordered byte stream over one logical peer connection.
pub struct RdtStream {
    inner: Arc<PeerInner>,
}

impl RdtStream {
    pub(crate) fn from_inner(inner: Arc<PeerInner>) -> Self {
        Self { inner }
    }

    /// Open an outbound connection to a rendezvous listener at `remote`,
    /// binding an ephemeral local socket.
    pub async fn connect(config: RdtConfig, remote: SocketAddr) -> Result<RdtStream> {
        let unspecified = match remote {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::connect_from(config, SocketAddr::new(unspecified, 0), remote).await
    }

    /// As [`RdtStream::connect`], binding the local socket to `local`.
    ///
    /// The connection request is retransmitted at the configured
    /// retransmission cadence until the listener echoes it back from
    /// exactly `remote`. The overall attempt is bounded by the write
    /// timeout and fails with [`RdtError::Timeout`].
    pub async fn connect_from(
        config: RdtConfig,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<RdtStream> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(local).await?);
        let loss = LossDice::new(&config);
        let deadline = config.write_timeout().map(|t| Instant::now() + t);
        let mut buf = vec![0u8; MAX_RAW_LEN];
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!(%remote, "connection attempt timed out");
                return Err(RdtError::Timeout);
            }
            send_raw_to(&socket, &loss, &Diagram::connect_request(), remote).await;
            match time::timeout(
                config.retransmit_timeout(),
                await_echo(&socket, remote, &mut buf),
            )
            .await
            {
                Ok(Ok(())) => break,
                Ok(Err(error)) => return Err(error.into()),
                Err(_) => continue, // cadence elapsed, resend the request
            }
        }
        let inner = PeerInner::new(config, socket, remote, true, loss);
        let task = tokio::spawn(peer_loop(Arc::clone(&inner)));
        *inner.listen_task.lock() = Some(task);
        debug!(%remote, "connection established");
        Ok(RdtStream { inner })
    }

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.remote
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Datagrams resent by the flush scan since the connection opened.
    pub fn retransmissions(&self) -> u64 {
        self.inner.retransmissions.load(Ordering::Relaxed)
    }

    /// Write the whole of `data`, slicing it into diagrams of at most the
    /// configured payload size.
    ///
    /// Backpressures on window occupancy: a chunk that fills the send
    /// window drains it down to one free slot before the next chunk, and
    /// the final chunk is followed by a full drain. Returning `Ok` means
    /// the peer acknowledged every chunk.
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.inner.can_write() {
            return Err(RdtError::Unsupported(
                "write on a closed or receive-only connection",
            ));
        }
        let deadline = self.inner.config.write_timeout().map(|t| Instant::now() + t);
        let window = self.inner.config.send_window as usize;
        for chunk in data.chunks(self.inner.config.max_payload as usize) {
            let diagram = self.inner.send.lock().assign(Bytes::copy_from_slice(chunk));
            self.inner.send_raw(&diagram).await;
            if self.inner.send.lock().in_flight() >= window {
                self.flush_until(window - 1, deadline).await?;
            }
        }
        self.flush_until(0, deadline).await
    }

    /// Drain the send window completely.
    pub async fn flush(&self) -> Result<()> {
        self.flush_to(0).await
    }

    /// Drain the send window until at most `target` diagrams remain in
    /// flight.
    pub async fn flush_to(&self, target: usize) -> Result<()> {
        let deadline = self.inner.config.write_timeout().map(|t| Instant::now() + t);
        self.flush_until(target, deadline).await
    }

    /// The drain loop: at the configured cadence, retransmit overdue
    /// diagrams and slide the confirmed prefix out of the window, until
    /// occupancy reaches `target`, the deadline passes ([`RdtError::Timeout`])
    /// or the connection closes underneath us ([`RdtError::Closed`]).
    async fn flush_until(&self, target: usize, deadline: Option<Instant>) -> Result<()> {
        let rto = self.inner.config.retransmit_timeout();
        let cadence = self.inner.config.sleep_interval();
        loop {
            let resend = {
                let mut send = self.inner.send.lock();
                if send.in_flight() <= target {
                    return Ok(());
                }
                let resend = send.due_for_retransmit(rto);
                send.slide();
                resend
            };
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(RdtError::Timeout);
            }
            if self.inner.is_closed() {
                return Err(RdtError::Closed);
            }
            if !resend.is_empty() {
                self.inner
                    .retransmissions
                    .fetch_add(resend.len() as u64, Ordering::Relaxed);
                for diagram in &resend {
                    self.inner.send_raw(diagram).await;
                }
            }
            time::sleep(cadence).await;
        }
    }

    /// Read available bytes into `buf`.
    ///
    /// Blocks until at least one payload is deliverable, then drains queued
    /// payloads until `buf` is full or the queue runs dry. A payload larger
    /// than the remaining room persists as a residual for the next call.
    /// Returns `Ok(0)` once the connection is closed (end of stream) and
    /// [`RdtError::Timeout`] when the read deadline elapses first.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.inner.config.direction == Direction::SenderOnly {
            return Err(RdtError::Unsupported("read on a send-only connection"));
        }
        if self.inner.is_closed() || buf.is_empty() {
            return Ok(0);
        }
        let deadline = self.inner.config.read_timeout().map(|t| Instant::now() + t);
        let cadence = self.inner.config.sleep_interval();
        let mut copied = 0;
        loop {
            let next = {
                let mut leftover = self.inner.leftover.lock();
                if leftover.is_empty() {
                    self.inner.deliverable.pop()
                } else {
                    Some(std::mem::take(&mut *leftover))
                }
            };
            match next {
                Some(mut payload) => {
                    let room = buf.len() - copied;
                    if payload.len() > room {
                        buf[copied..].copy_from_slice(&payload.split_to(room));
                        *self.inner.leftover.lock() = payload;
                        copied += room;
                        break;
                    }
                    buf[copied..copied + payload.len()].copy_from_slice(&payload);
                    copied += payload.len();
                    if copied == buf.len() || self.inner.deliverable.is_empty() {
                        break;
                    }
                }
                None => {
                    if copied > 0 {
                        break;
                    }
                    if self.inner.is_closed() {
                        return Ok(0);
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(RdtError::Timeout);
                    }
                    time::sleep(cadence).await;
                }
            }
        }
        Ok(copied)
    }

    /// Announce the disconnect to the remote and tear the connection down.
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        self.inner.shutdown_with_disconnect().await;
        let task = self.inner.listen_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!(remote = %self.inner.remote, "connection closed");
    }
}

impl Drop for RdtStream {
    fn drop(&mut self) {
        // Last-resort teardown: stop the background loop. The disconnect
        // sentinel only goes out on an explicit close.
        self.inner.mark_closed();
    }
}

impl std::fmt::Debug for RdtStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdtStream")
            .field("remote", &self.inner.remote)
            .field("owns_socket", &self.inner.owns_socket)
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// Wait for the connection-request echo from exactly `remote`; everything
/// else arriving during the handshake is dropped.
async fn await_echo(
    socket: &UdpSocket,
    remote: SocketAddr,
    buf: &mut [u8],
) -> std::io::Result<()> {
    loop {
        let (len, from) = socket.recv_from(buf).await?;
        if len == 0 || from != remote {
            continue;
        }
        if let Ok(diagram) = Diagram::decode(&buf[..len]) {
            if diagram.is_connect_request() {
                return Ok(());
            }
        }
    }
}

/// Background receive loop of an outbound peer: sole reader of its socket,
/// classifying every inbound diagram and updating window state.
async fn peer_loop(inner: Arc<PeerInner>) {
    let mut shutdown = inner.subscribe_shutdown();
    let mut buf = vec![0u8; MAX_RAW_LEN];
    loop {
        if inner.is_closed() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            received = inner.socket.recv_from(&mut buf) => match received {
                Ok((0, _)) => continue,
                Ok((len, from)) => {
                    if from != inner.remote {
                        continue;
                    }
                    let Ok(diagram) = Diagram::decode(&buf[..len]) else {
                        continue;
                    };
                    trace!(
                        sequence = diagram.sequence,
                        ack = diagram.is_ack,
                        %from,
                        "datagram received"
                    );
                    if diagram.is_connect_request() {
                        // Duplicate handshake echo; the connection is up.
                        continue;
                    }
                    if diagram.is_disconnect_request() {
                        debug!(remote = %inner.remote, "remote requested disconnect");
                        inner.mark_closed();
                        break;
                    }
                    inner.handle_diagram(diagram).await;
                }
                Err(error) => {
                    // The socket was closed out from under us or hiccuped;
                    // closing is terminal, anything else is retried.
                    if inner.is_closed() {
                        break;
                    }
                    debug!(%error, "receive failed");
                    time::sleep(inner.config.sleep_interval()).await;
                }
            },
        }
    }
}
