//! The rendezvous end: one physical socket demultiplexing many peers.
//!
//! A listener's background loop is the sole reader of the shared socket.
//! Connection requests from unseen addresses spawn a new peer, register it
//! in the table and queue it for [`RdtListener::accept`]; requests from
//! known addresses only re-echo the handshake. Data and acknowledgment
//! diagrams route to the registered peer for their source address; anything
//! from an unknown address is dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace};

use crate::config::RdtConfig;
use crate::diagram::{Diagram, MAX_RAW_LEN};
use crate::error::{RdtError, Result};
use crate::loss::LossDice;
use crate::stream::{send_raw_to, PeerInner, RdtStream};

/// Cadence of the accept-queue poll.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// The rendezvous instance: owns the physical socket and demultiplexes
/// inbound connection requests into independent [`RdtStream`] peers.
pub struct RdtListener {
    inner: Arc<ListenerInner>,
}

struct ListenerInner {
    config: RdtConfig,
    socket: Arc<UdpSocket>,
    loss: LossDice,
    /// Registered peers keyed by remote address. Only this listener's loop
    /// inserts; removal happens on disconnect or cascade close.
    peers: Mutex<HashMap<SocketAddr, Arc<PeerInner>>>,
    /// Peers awaiting an `accept` call.
    pending: SegQueue<RdtStream>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

impl RdtListener {
    /// Bind the rendezvous socket on `local` and start demultiplexing.
    pub async fn bind(config: RdtConfig, local: SocketAddr) -> Result<RdtListener> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(local).await?);
        let bound = socket.local_addr()?;
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(ListenerInner {
            loss: LossDice::new(&config),
            config,
            socket,
            peers: Mutex::new(HashMap::new()),
            pending: SegQueue::new(),
            closed: AtomicBool::new(false),
            shutdown,
            listen_task: Mutex::new(None),
        });
        let task = tokio::spawn(rendezvous_loop(Arc::clone(&inner)));
        *inner.listen_task.lock() = Some(task);
        debug!(addr = %bound, "listener bound");
        Ok(RdtListener { inner })
    }

    /// Local address of the rendezvous socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of currently registered peers.
    pub fn peer_count(&self) -> usize {
        self.inner.peers.lock().len()
    }

    /// Dequeue the next accepted peer, waiting until one arrives. Returns
    /// [`RdtError::Closed`] once the listener has shut down.
    pub async fn accept(&self) -> Result<RdtStream> {
        loop {
            if let Some(stream) = self.inner.pending.pop() {
                return Ok(stream);
            }
            if self.is_closed() {
                return Err(RdtError::Closed);
            }
            time::sleep(ACCEPT_POLL).await;
        }
    }

    /// Cascade close: announce the disconnect to every registered peer,
    /// then release the socket. Calling it again is a no-op.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown.send(true);
        let peers: Vec<Arc<PeerInner>> = self
            .inner
            .peers
            .lock()
            .drain()
            .map(|(_, peer)| peer)
            .collect();
        for peer in peers {
            peer.shutdown_with_disconnect().await;
        }
        let task = self.inner.listen_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("listener closed");
    }
}

impl Drop for RdtListener {
    fn drop(&mut self) {
        // Stop the loop and strand the peers; the disconnect cascade only
        // runs on an explicit close.
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            let _ = self.inner.shutdown.send(true);
        }
    }
}

impl std::fmt::Debug for RdtListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdtListener")
            .field("peers", &self.peer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Background loop of the rendezvous socket: sole reader, fans every
/// inbound diagram out to connection setup, teardown or a registered peer.
async fn rendezvous_loop(inner: Arc<ListenerInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    let mut buf = vec![0u8; MAX_RAW_LEN];
    loop {
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            received = inner.socket.recv_from(&mut buf) => match received {
                Ok((0, _)) => continue,
                Ok((len, from)) => {
                    let Ok(diagram) = Diagram::decode(&buf[..len]) else {
                        continue;
                    };
                    dispatch(&inner, diagram, from).await;
                }
                Err(error) => {
                    if inner.closed.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!(%error, "receive failed");
                    time::sleep(inner.config.sleep_interval()).await;
                }
            },
        }
    }
}

async fn dispatch(inner: &ListenerInner, diagram: Diagram, from: SocketAddr) {
    if diagram.is_connect_request() {
        let first_contact = {
            let mut peers = inner.peers.lock();
            if peers.contains_key(&from) {
                false
            } else {
                let peer = PeerInner::new(
                    inner.config.clone(),
                    Arc::clone(&inner.socket),
                    from,
                    false,
                    LossDice::new(&inner.config),
                );
                peers.insert(from, Arc::clone(&peer));
                inner.pending.push(RdtStream::from_inner(peer));
                true
            }
        };
        if first_contact {
            debug!(%from, "peer accepted");
        }
        // Echo unconditionally so a lost echo is healed by the peer's
        // retried request.
        send_raw_to(&inner.socket, &inner.loss, &Diagram::connect_request(), from).await;
        return;
    }
    if diagram.is_disconnect_request() {
        let peer = inner.peers.lock().remove(&from);
        if let Some(peer) = peer {
            peer.mark_closed();
            send_raw_to(
                &inner.socket,
                &inner.loss,
                &Diagram::disconnect_request(),
                from,
            )
            .await;
            debug!(%from, "peer disconnected");
        }
        return;
    }
    let peer = inner.peers.lock().get(&from).cloned();
    match peer {
        Some(peer) => peer.handle_diagram(diagram).await,
        None => trace!(%from, "datagram from unknown peer dropped"),
    }
}
