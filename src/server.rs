/*!
 * Network Layer and Server Lifecycle
 *
 * Binds the listener, runs the accept loop, spawns one connection handler
 * thread per client and one dispatcher thread for the lifetime of the
 * server. Shutdown is a broadcast: dropping the shutdown sender wakes the
 * accept loop, the dispatcher and any handler blocked on a send.
 */

use crate::config::Config;
use crate::dispatcher::{channels, Dispatcher};
use crate::peer::{Connection, Peer, PeerId, PeerLinks};
use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often an idle accept loop checks for shutdown
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Pending-connection queue length passed to listen(2)
const BACKLOG: i32 = 1024;

/// Bind a TCP listener with SO_REUSEADDR
///
/// The listener is non-blocking so the accept loop can observe shutdown.
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // Accept IPv4-mapped clients on an IPv6 wildcard
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

/// Clonable trigger that stops a running [`Server`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl ShutdownHandle {
    /// Signal shutdown; later calls are no-ops
    pub fn shutdown(&self) {
        // Dropping the only sender disconnects every receiver at once
        self.tx.lock().take();
    }
}

pub struct Server {
    config: Config,
    listener: TcpListener,
    shutdown: ShutdownHandle,
    shutdown_rx: Receiver<()>,
    next_id: AtomicU64,
}

impl Server {
    /// Bind the configured address
    ///
    /// Candidates are tried in order; the first that binds wins. Failure on
    /// all of them is fatal for the process.
    pub fn bind(config: Config) -> Result<Self> {
        let mut last_err = None;
        let mut bound = None;
        for addr in config.socket_addrs()? {
            match bind_listener(addr) {
                Ok(listener) => {
                    bound = Some(listener);
                    break;
                }
                Err(e) => {
                    debug!("bind {} failed: {}", addr, e);
                    last_err = Some(e.context(format!("failed to bind {}", addr)));
                }
            }
        }
        let listener = match (bound, last_err) {
            (Some(listener), _) => listener,
            (None, Some(e)) => return Err(e),
            (None, None) => return Err(anyhow!("no listen address to bind")),
        };

        // Never sent on; only its disconnection is observed
        let (tx, shutdown_rx) = bounded::<()>(0);

        Ok(Self {
            config,
            listener,
            shutdown: ShutdownHandle {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            shutdown_rx,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serve until shutdown is signalled
    ///
    /// Blocks the calling thread. Returns once the accept loop has stopped
    /// and the dispatcher has closed every registered peer.
    pub fn run(self) -> Result<()> {
        let (links, inbox) = channels(self.shutdown_rx.clone());
        let dispatcher = Dispatcher::new(self.config.error_replies);
        let dispatcher = std::thread::Builder::new()
            .name("dispatcher".into())
            .spawn(move || dispatcher.run(inbox))
            .context("failed to spawn dispatcher thread")?;

        info!("kvloop listening on {}", self.local_addr()?);
        self.accept_loop(&links);

        let dispatcher = dispatcher
            .join()
            .map_err(|_| anyhow!("dispatcher thread panicked"))?;
        info!(
            "server stopped ({} keys, {} peers open at shutdown)",
            dispatcher.store().len(),
            dispatcher.peer_count()
        );
        Ok(())
    }

    fn accept_loop(&self, links: &PeerLinks) {
        loop {
            if let Err(TryRecvError::Disconnected) = self.shutdown_rx.try_recv() {
                break;
            }

            match self.listener.accept() {
                Ok((stream, addr)) => self.spawn_peer(stream, addr, links),
                Err(ref e) if would_block(e) => {
                    if self.wait_for_shutdown() {
                        break;
                    }
                }
                Err(e) => {
                    // Typically fd exhaustion; back off rather than spin
                    warn!("accept error: {}", e);
                    if self.wait_for_shutdown() {
                        break;
                    }
                }
            }
        }
        info!("accept loop stopped");
    }

    /// Sleep for one poll interval; `true` if shutdown was signalled
    fn wait_for_shutdown(&self) -> bool {
        matches!(
            self.shutdown_rx.recv_timeout(ACCEPT_POLL),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    fn spawn_peer(&self, stream: TcpStream, addr: SocketAddr, links: &PeerLinks) {
        let id = PeerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        // Some platforms hand out accepted sockets in the listener's mode
        if let Err(e) = stream.set_nonblocking(false) {
            warn!("peer {} ({}) rejected: {}", id, addr, e);
            return;
        }
        stream.set_nodelay(true).ok();

        let peer = Arc::new(Peer::new(id, addr, stream));

        // Bounds how long the dispatcher can block on a client that stops reading
        if self.config.write_timeout_ms > 0 {
            let timeout = Duration::from_millis(self.config.write_timeout_ms);
            if let Err(e) = peer.set_write_timeout(Some(timeout)) {
                warn!("peer {} ({}) rejected: {}", id, addr, e);
                return;
            }
        }

        let conn = match Connection::new(peer, links.clone()) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("peer {} ({}) rejected: {}", id, addr, e);
                return;
            }
        };

        info!("peer {} connected from {}", id, addr);
        let spawned = std::thread::Builder::new()
            .name(format!("peer-{}", id.0))
            .spawn(move || {
                if let Err(e) = conn.run() {
                    warn!("peer {} closed with error: {}", id, e);
                }
            });
        if let Err(e) = spawned {
            error!("failed to spawn handler for peer {}: {}", id, e);
        }
    }
}

/// Check if an I/O error indicates the operation would block
#[inline]
fn would_block(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
    )
}
