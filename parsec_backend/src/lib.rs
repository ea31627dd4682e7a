//! Parsec backend: storage of vlobs and blocks plus the JSON wire protocol.
//!
//! - [`MemoryBackend`]: in-memory vlob/user-vlob/block storage enforcing
//!   trust seeds and strict `current + 1` versioning.
//! - [`BackendSession`]: a user's view of the backend; implements
//!   [`parsec_core::VlobApi`] and [`parsec_core::Store`].
//! - [`BackendServer`]: serves any session over a byte duplex.
//! - [`BackendConnection`]: client implementing the same two traits on top
//!   of a byte duplex.
//!
//! The wire format is defined in [`protocol`].

mod connection;
mod memory;
pub mod protocol;
mod server;

pub use connection::BackendConnection;
pub use memory::{BackendSession, MemoryBackend};
pub use protocol::{Reply, Request, Status};
pub use server::BackendServer;

/// Connects `user` to `backend` through an in-memory duplex pipe.
///
/// The server side runs on a spawned task for as long as the returned
/// connection (or one of its clones) is alive.
pub fn connect_in_memory(
    backend: &std::sync::Arc<MemoryBackend>,
    user: parsec_core::UserId,
) -> BackendConnection {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = BackendServer::new(backend.session(user));
    tokio::spawn(async move {
        if let Err(err) = server.serve(server_io).await {
            tracing::warn!("in-memory backend connection ended: {err}");
        }
    });
    BackendConnection::connect(client_io)
}
