/*!
 * Peer Connection Handling
 *
 * One `Connection` runs per accepted client on its own thread. It decodes
 * requests and hands them to the dispatcher; it never touches the store and
 * never decides what to reply. Replies are written by the dispatcher through
 * the shared `Peer` handle.
 */

use crate::command::Cmd;
use crate::dispatcher::Message;
use crate::error::{PeerError, ProtocolError};
use crate::protocol::FrameReader;
use crossbeam::channel::{select, Receiver, Sender};
use log::{debug, info, trace, warn};
use std::fmt;
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Server-assigned connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared handle to one live client connection
///
/// The connection handler holds one reference for reading; the dispatcher
/// holds another in its registry and writes replies through it.
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    addr: SocketAddr,
    stream: TcpStream,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr, stream: TcpStream) -> Self {
        Self { id, addr, stream }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Write an encoded reply on this peer's connection
    pub fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        (&self.stream).write_all(bytes)
    }

    /// Bound how long `send` may block; `None` blocks indefinitely
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    /// Shut the socket down; a handler blocked in `read` wakes with EOF
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Producer ends of the dispatcher's inbound channels
///
/// All three channels are rendezvous channels: every offer blocks until the
/// dispatcher takes it, which throttles all connections to the dispatcher's
/// pace. Each offer also watches the shutdown signal so a handler cannot
/// block forever once the dispatcher is gone.
#[derive(Clone)]
pub struct PeerLinks {
    pub(crate) add_peer: Sender<Arc<Peer>>,
    pub(crate) del_peer: Sender<PeerId>,
    pub(crate) msg: Sender<Message>,
    pub(crate) shutdown: Receiver<()>,
}

impl PeerLinks {
    pub fn register(&self, peer: Arc<Peer>) -> bool {
        offer(&self.add_peer, peer, &self.shutdown)
    }

    pub fn deregister(&self, id: PeerId) -> bool {
        offer(&self.del_peer, id, &self.shutdown)
    }

    pub fn submit(&self, msg: Message) -> bool {
        offer(&self.msg, msg, &self.shutdown)
    }
}

/// Hand `item` to the dispatcher, or give up on shutdown
///
/// Returns `false` when the dispatcher is no longer accepting events.
fn offer<T>(tx: &Sender<T>, item: T, shutdown: &Receiver<()>) -> bool {
    select! {
        send(tx, item) -> res => res.is_ok(),
        recv(shutdown) -> _ => false,
    }
}

/// Read side of one client connection
pub struct Connection {
    peer: Arc<Peer>,
    reader: FrameReader<TcpStream>,
    links: PeerLinks,
}

impl Connection {
    pub fn new(peer: Arc<Peer>, links: PeerLinks) -> std::io::Result<Self> {
        let reader = FrameReader::new(peer.stream.try_clone()?);
        Ok(Self {
            peer,
            reader,
            links,
        })
    }

    /// Run the read loop until the client disconnects
    ///
    /// Registers the peer, then forwards one message per decoded command.
    /// Requests that are not valid commands are logged and dropped. A
    /// malformed byte stream ends this connection only.
    pub fn run(mut self) -> Result<(), PeerError> {
        let id = self.peer.id();
        if !self.links.register(Arc::clone(&self.peer)) {
            debug!("peer {} not registered: dispatcher stopped", id);
            return Ok(());
        }

        loop {
            let frame = match self.reader.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(ProtocolError::Io(ref e)) if is_disconnect(e.kind()) => {
                    debug!("peer {} connection dropped: {}", id, e);
                    break;
                }
                Err(e) => {
                    warn!("peer {} sent malformed input, closing: {}", id, e);
                    self.links.deregister(id);
                    self.peer.close();
                    return Err(e.into());
                }
            };

            let cmd = match Cmd::from_frame(frame) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!("peer {} request dropped: {}", id, e);
                    continue;
                }
            };

            trace!("peer {} -> {}", id, cmd.name());
            let msg = Message {
                cmd,
                peer: Arc::clone(&self.peer),
            };
            if !self.links.submit(msg) {
                debug!("peer {} stopping: dispatcher stopped", id);
                return Ok(());
            }
        }

        info!("peer {} ({}) disconnected", id, self.peer.addr());
        self.links.deregister(id);
        Ok(())
    }
}

#[inline]
fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}
