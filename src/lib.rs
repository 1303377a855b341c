// Core modules for the kvloop key-value server
pub mod config; // Config + listen address resolution
pub mod error; // Typed errors for codec, commands and dispatch
pub mod protocol; // RESP parser + streaming reader + encoders
pub mod command; // Cmd enum decoded from request frames
pub mod storage; // Store (single-owner byte map)
pub mod peer; // Peer handle + per-connection read loop
pub mod dispatcher; // Dispatcher (the single serialization point)
pub mod server; // Listener, accept loop, thread lifecycle

// Re-export all public items from modules for easier access
pub use command::*;
pub use config::*;
pub use dispatcher::*;
pub use error::*;
pub use peer::*;
pub use protocol::*;
pub use server::*;
pub use storage::*;
