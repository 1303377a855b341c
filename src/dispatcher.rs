/*!
 * Command Dispatcher
 *
 * The dispatcher is the single serialization point of the server. It owns
 * the store and the registry of live peers, and consumes every
 * registration, deregistration and command event one at a time on its own
 * thread. Nothing else mutates either structure, so neither needs a lock.
 */

use crate::command::Cmd;
use crate::error::DispatchError;
use crate::peer::{Peer, PeerId, PeerLinks};
use crate::protocol::{write_bulk, write_error, write_map_len, write_simple, write_simple_bytes};
use crate::storage::Store;
use bytes::BytesMut;
use crossbeam::channel::{bounded, select, Receiver};
use hashbrown::HashMap;
use log::{debug, error, info, trace};
use std::sync::Arc;

/// Identifier advertised in the HELLO reply
pub const SERVER_NAME: &str = "redis";

/// A command together with the peer that must receive the reply
#[derive(Debug)]
pub struct Message {
    pub cmd: Cmd,
    pub peer: Arc<Peer>,
}

/// Unit of work crossing from a connection handler into the dispatcher
#[derive(Debug)]
pub enum Event {
    Register(Arc<Peer>),
    Deregister(PeerId),
    Command(Message),
}

/// Consumer ends of the dispatcher's inbound channels
pub struct Inbox {
    add_peer: Receiver<Arc<Peer>>,
    del_peer: Receiver<PeerId>,
    msg: Receiver<Message>,
    shutdown: Receiver<()>,
}

/// Create the dispatcher's three inbound channels
///
/// Capacity zero makes every send a rendezvous with the dispatcher. This is
/// the server's backpressure: a busy dispatcher throttles every connection
/// uniformly instead of queueing work without bound.
pub fn channels(shutdown: Receiver<()>) -> (PeerLinks, Inbox) {
    let (add_tx, add_rx) = bounded(0);
    let (del_tx, del_rx) = bounded(0);
    let (msg_tx, msg_rx) = bounded(0);

    let links = PeerLinks {
        add_peer: add_tx,
        del_peer: del_tx,
        msg: msg_tx,
        shutdown: shutdown.clone(),
    };
    let inbox = Inbox {
        add_peer: add_rx,
        del_peer: del_rx,
        msg: msg_rx,
        shutdown,
    };
    (links, inbox)
}

/// Owner of all mutable server state
#[derive(Default)]
pub struct Dispatcher {
    store: Store,
    peers: HashMap<PeerId, Arc<Peer>>,
    /// Report per-request failures to the client as RESP errors
    error_replies: bool,
}

impl Dispatcher {
    pub fn new(error_replies: bool) -> Self {
        Self {
            error_replies,
            ..Self::default()
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn is_registered(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    /// Run the event loop until the shutdown signal fires
    ///
    /// Events are handled strictly one at a time in arrival order. On
    /// shutdown every registered peer is closed so its handler's blocking
    /// read returns. The final state is handed back to the caller.
    pub fn run(mut self, inbox: Inbox) -> Self {
        loop {
            let event = select! {
                recv(inbox.add_peer) -> peer => peer.ok().map(Event::Register),
                recv(inbox.del_peer) -> id => id.ok().map(Event::Deregister),
                recv(inbox.msg) -> msg => msg.ok().map(Event::Command),
                recv(inbox.shutdown) -> _ => None,
            };
            let Some(event) = event else {
                break;
            };
            self.handle_event(event);
        }

        info!("dispatcher stopping, closing {} peers", self.peers.len());
        for peer in self.peers.values() {
            peer.close();
        }
        self
    }

    /// Apply one event
    ///
    /// Dispatch failures are logged here and never escape: one broken
    /// connection cannot stop the loop. A peer whose reply write fails or
    /// times out is closed and dropped from the registry.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Register(peer) => {
                debug!("register peer {}", peer.id());
                self.peers.insert(peer.id(), peer);
            }
            Event::Deregister(id) => {
                // Absent peers are fine: removal is idempotent
                if self.peers.remove(&id).is_some() {
                    debug!("deregister peer {}", id);
                }
            }
            Event::Command(msg) => {
                let id = msg.peer.id();
                match self.dispatch(msg) {
                    Ok(()) => {}
                    Err(DispatchError::KeyNotFound) => {
                        debug!("peer {}: key not found", id);
                    }
                    Err(e @ DispatchError::Write { .. }) => {
                        // A reply may be half written; the stream is unusable
                        error!("peer {}: {}, closing", id, e);
                        if let Some(peer) = self.peers.remove(&id) {
                            peer.close();
                        }
                    }
                }
            }
        }
    }

    /// Execute a command and write its reply to the originating peer
    pub fn dispatch(&mut self, msg: Message) -> Result<(), DispatchError> {
        let Message { cmd, peer } = msg;
        trace!("dispatch {} for peer {}", cmd.name(), peer.id());

        let mut out = BytesMut::new();
        let result = self.execute(cmd, &mut out);

        if let Err(DispatchError::KeyNotFound) = &result {
            if self.error_replies {
                write_error("ERR key not found", &mut out);
            }
        }
        if !out.is_empty() {
            peer.send(&out).map_err(|source| DispatchError::Write {
                peer: peer.id(),
                source,
            })?;
        }
        result
    }

    /// Apply a command to the store and encode the reply onto `out`
    ///
    /// Nothing is written on failure.
    pub fn execute(&mut self, cmd: Cmd, out: &mut BytesMut) -> Result<(), DispatchError> {
        match cmd {
            Cmd::Set { key, value } => {
                self.store.set(key, value);
                write_simple("OK", out);
            }
            Cmd::Get { key } => {
                let value = self.store.get(&key).ok_or(DispatchError::KeyNotFound)?;
                write_value(value, out);
            }
            // Accepted for handshake compatibility; the subcommand is not interpreted
            Cmd::Client { .. } => write_simple("OK", out),
            Cmd::Hello => {
                write_map_len(1, out);
                write_simple("server", out);
                write_simple(SERVER_NAME, out);
            }
        }
        Ok(())
    }
}

/// Encode a stored value as a simple string
///
/// Simple strings are line-framed text, so values containing CR, LF or
/// non-UTF-8 bytes go out as bulk strings instead.
fn write_value(value: &[u8], out: &mut BytesMut) {
    let framable = !value.iter().any(|&b| b == b'\r' || b == b'\n')
        && std::str::from_utf8(value).is_ok();
    if framable {
        write_simple_bytes(value, out);
    } else {
        write_bulk(value, out);
    }
}
