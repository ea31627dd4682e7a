//! Serves a backend session over any byte duplex.

use std::{collections::HashSet, fmt, sync::Arc};

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use parsec_core::{BackendEvent, BlockId, EventKind, Store, VlobApi, VlobError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::protocol::{MAX_FRAME_LEN, Reply, Request, Status};

/// Server that exposes a session (vlobs + blocks) as line-delimited JSON.
///
/// Generic over any session implementing both [`VlobApi`] and [`Store`],
/// e.g. [`crate::BackendSession`].
#[derive(Clone)]
pub struct BackendServer<S> {
    session: Arc<S>,
}

impl<S> fmt::Debug for BackendServer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendServer").finish()
    }
}

impl<S: VlobApi + Store> BackendServer<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Executes one request against the session.
    pub async fn handle(&self, request: Request) -> Reply {
        match request {
            Request::VlobCreate { id, blob } => match self.session.vlob_create(id, blob).await {
                Ok(created) => Reply {
                    id: Some(created.id.to_string()),
                    read_trust_seed: Some(created.read_trust_seed),
                    write_trust_seed: Some(created.write_trust_seed),
                    ..Reply::ok()
                },
                Err(err) => err.into(),
            },
            Request::VlobRead {
                id,
                trust_seed,
                version,
            } => match self.session.vlob_read(&id, &trust_seed, version).await {
                Ok(read) => Reply {
                    id: Some(id.to_string()),
                    blob: Some(read.blob),
                    version: Some(read.version),
                    ..Reply::ok()
                },
                Err(err) => err.into(),
            },
            Request::VlobUpdate {
                id,
                version,
                trust_seed,
                blob,
            } => into_reply(
                self.session
                    .vlob_update(&id, &trust_seed, version, blob)
                    .await,
            ),
            Request::VlobDelete { id, trust_seed } => {
                into_reply(self.session.vlob_delete(&id, &trust_seed).await)
            }
            Request::UserVlobRead { version } => match self.session.user_vlob_read(version).await {
                Ok(read) => Reply {
                    blob: Some(read.blob),
                    version: Some(read.version),
                    ..Reply::ok()
                },
                Err(err) => err.into(),
            },
            Request::UserVlobUpdate { version, blob } => {
                into_reply(self.session.user_vlob_update(version, blob).await)
            }
            Request::BlockCreate { id, content } => {
                let id = id.unwrap_or_else(BlockId::random);
                match self.session.put_bytes(id.as_str(), content).await {
                    Ok(()) => Reply {
                        id: Some(id.to_string()),
                        ..Reply::ok()
                    },
                    Err(err) => err.into(),
                }
            }
            Request::BlockRead { id } => {
                match self.session.open_read_bytes(id.as_str(), 0, None).await {
                    Ok(content) => Reply {
                        content: Some(content),
                        ..Reply::ok()
                    },
                    Err(err) => err.into(),
                }
            }
            Request::BlockDelete { id } => match self.session.delete(id.as_str()).await {
                Ok(()) => Reply::ok(),
                Err(err) => err.into(),
            },
            Request::Subscribe { event, sender } => {
                into_reply(self.session.subscribe(event, &sender).await)
            }
        }
    }

    /// Serves requests from `io` until the peer hangs up.
    ///
    /// Requests are answered in order. Events the peer subscribed to are
    /// interleaved between replies.
    pub async fn serve<IO>(&self, io: IO) -> Result<()>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        let events = self.session.events();
        let mut vlob_updated = events.on_vlob_updated();
        let mut user_vlob_updated = events.on_user_vlob_updated();
        let mut message_arrived = events.on_message_arrived();
        let mut subscriptions: HashSet<(EventKind, String)> = HashSet::new();

        loop {
            let pushed = tokio::select! {
                line = framed.next() => {
                    let Some(line) = line else { break };
                    let reply = match serde_json::from_str::<Request>(&line?) {
                        Ok(request) => {
                            if let Request::Subscribe { event, sender } = &request {
                                subscriptions.insert((*event, sender.clone()));
                            }
                            self.handle(request).await
                        }
                        Err(err) => {
                            debug!("rejecting malformed request: {err}");
                            Reply::error(Status::BadParams, err.to_string())
                        }
                    };
                    framed.send(serde_json::to_string(&reply)?).await?;
                    continue;
                }
                Ok(ev) = vlob_updated.recv() => BackendEvent {
                    event: EventKind::VlobUpdated,
                    sender: ev.id.to_string(),
                },
                Ok(ev) = user_vlob_updated.recv() => BackendEvent {
                    event: EventKind::UserVlobUpdated,
                    sender: ev.user.to_string(),
                },
                Ok(ev) = message_arrived.recv() => BackendEvent {
                    event: EventKind::MessageArrived,
                    sender: ev.recipient.to_string(),
                },
            };

            if subscriptions.contains(&(pushed.event, pushed.sender.clone())) {
                if let Err(err) = framed.send(serde_json::to_string(&pushed)?).await {
                    warn!("failed to push event: {err}");
                    return Err(err.into());
                }
            }
        }

        debug!("backend connection closed");
        Ok(())
    }
}

fn into_reply(result: Result<(), VlobError>) -> Reply {
    match result {
        Ok(()) => Reply::ok(),
        Err(err) => err.into(),
    }
}

impl<S> BackendServer<S> {
    pub fn session(&self) -> &S {
        &self.session
    }
}
