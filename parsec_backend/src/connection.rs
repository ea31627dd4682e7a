//! Client side of the backend protocol.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use parsec_core::{
    BlockId, EventBus, EventKind, Store, StoreError, StoreFeatures, StoreResult, TrustSeed,
    VersionedBlob, VlobApi, VlobCreated, VlobError, VlobId, VlobResult, store::PutResponse,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot},
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::protocol::{MAX_FRAME_LEN, Reply, Request, ServerFrame, Status};

struct PendingRequest {
    request: Request,
    responder: oneshot::Sender<Reply>,
}

/// A connection to a backend over a pre-authenticated byte duplex.
///
/// Requests are pipelined through a connection task which matches replies
/// to callers in order and routes pushed events onto [`Self::events`].
/// When the duplex closes every pending and future call fails with
/// `Offline`.
#[derive(Debug, Clone)]
pub struct BackendConnection {
    requests: mpsc::Sender<PendingRequest>,
    events: EventBus,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest").finish_non_exhaustive()
    }
}

impl BackendConnection {
    pub fn connect<IO>(io: IO) -> Self
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (requests, receiver) = mpsc::channel(1024);
        let events = EventBus::new();
        let framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_FRAME_LEN));
        tokio::spawn(run_connection(framed, receiver, events.clone()));
        Self { requests, events }
    }

    async fn call(&self, request: Request) -> Reply {
        let (responder, receiver) = oneshot::channel();
        if self
            .requests
            .send(PendingRequest { request, responder })
            .await
            .is_err()
        {
            return Reply::error(Status::Offline, "connection closed");
        }
        receiver
            .await
            .unwrap_or_else(|_| Reply::error(Status::Offline, "connection closed"))
    }

    async fn call_vlob(&self, id: Option<&VlobId>, request: Request) -> VlobResult<Reply> {
        let reply = self.call(request).await;
        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(reply.into_vlob_error(id))
        }
    }

    async fn call_block(&self, request: Request) -> StoreResult<Reply> {
        let reply = self.call(request).await;
        if reply.is_ok() {
            Ok(reply)
        } else {
            Err(reply.into_store_error())
        }
    }
}

async fn run_connection<IO>(
    mut framed: Framed<IO, LinesCodec>,
    mut receiver: mpsc::Receiver<PendingRequest>,
    events: EventBus,
) where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    let mut waiting: VecDeque<oneshot::Sender<Reply>> = VecDeque::new();

    loop {
        tokio::select! {
            pending = receiver.recv() => {
                let Some(PendingRequest { request, responder }) = pending else { break };
                let line = match serde_json::to_string(&request) {
                    Ok(line) => line,
                    Err(err) => {
                        let _ = responder.send(Reply::error(Status::BadParams, err.to_string()));
                        continue;
                    }
                };
                if let Err(err) = framed.send(line).await {
                    warn!("backend connection write failed: {err}");
                    let _ = responder.send(Reply::error(Status::Offline, err.to_string()));
                    break;
                }
                waiting.push_back(responder);
            }
            frame = framed.next() => {
                let line = match frame {
                    Some(Ok(line)) => line,
                    Some(Err(err)) => {
                        warn!("backend connection read failed: {err}");
                        break;
                    }
                    None => break,
                };
                match serde_json::from_str::<ServerFrame>(&line) {
                    Ok(ServerFrame::Reply(reply)) => match waiting.pop_front() {
                        Some(responder) => {
                            let _ = responder.send(reply);
                        }
                        None => warn!("dropping unsolicited reply"),
                    },
                    Ok(ServerFrame::Event(event)) => events.publish(event),
                    Err(err) => warn!("dropping malformed frame: {err}"),
                }
            }
        }
    }

    // Dropping the remaining responders reports `Offline` to their callers.
    debug!(pending = waiting.len(), "backend connection task finished");
}

fn missing(field: &str) -> VlobError {
    VlobError::Backend(format!("reply is missing `{field}`"))
}

#[async_trait]
impl VlobApi for BackendConnection {
    async fn vlob_create(&self, id: Option<VlobId>, blob: Bytes) -> VlobResult<VlobCreated> {
        let addressed = id.clone();
        let reply = self
            .call_vlob(addressed.as_ref(), Request::VlobCreate { id, blob })
            .await?;
        Ok(VlobCreated {
            id: VlobId::new(reply.id.ok_or_else(|| missing("id"))?),
            read_trust_seed: reply
                .read_trust_seed
                .ok_or_else(|| missing("read_trust_seed"))?,
            write_trust_seed: reply
                .write_trust_seed
                .ok_or_else(|| missing("write_trust_seed"))?,
        })
    }

    async fn vlob_read(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: Option<u64>,
    ) -> VlobResult<VersionedBlob> {
        let request = Request::VlobRead {
            id: id.clone(),
            trust_seed: trust_seed.clone(),
            version,
        };
        let reply = self.call_vlob(Some(id), request).await?;
        Ok(VersionedBlob {
            blob: reply.blob.ok_or_else(|| missing("blob"))?,
            version: reply.version.ok_or_else(|| missing("version"))?,
        })
    }

    async fn vlob_update(
        &self,
        id: &VlobId,
        trust_seed: &TrustSeed,
        version: u64,
        blob: Bytes,
    ) -> VlobResult<()> {
        let request = Request::VlobUpdate {
            id: id.clone(),
            version,
            trust_seed: trust_seed.clone(),
            blob,
        };
        self.call_vlob(Some(id), request).await?;
        Ok(())
    }

    async fn vlob_delete(&self, id: &VlobId, trust_seed: &TrustSeed) -> VlobResult<()> {
        let request = Request::VlobDelete {
            id: id.clone(),
            trust_seed: trust_seed.clone(),
        };
        self.call_vlob(Some(id), request).await?;
        Ok(())
    }

    async fn user_vlob_read(&self, version: Option<u64>) -> VlobResult<VersionedBlob> {
        let reply = self
            .call_vlob(None, Request::UserVlobRead { version })
            .await?;
        Ok(VersionedBlob {
            blob: reply.blob.unwrap_or_default(),
            version: reply.version.ok_or_else(|| missing("version"))?,
        })
    }

    async fn user_vlob_update(&self, version: u64, blob: Bytes) -> VlobResult<()> {
        self.call_vlob(None, Request::UserVlobUpdate { version, blob })
            .await?;
        Ok(())
    }

    async fn subscribe(&self, kind: EventKind, sender: &str) -> VlobResult<()> {
        let request = Request::Subscribe {
            event: kind,
            sender: sender.to_string(),
        };
        self.call_vlob(Some(&VlobId::new(sender)), request).await?;
        Ok(())
    }

    fn events(&self) -> &EventBus {
        &self.events
    }
}

#[async_trait]
impl Store for BackendConnection {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_list: false,
            case_sensitive: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        match self.open_read_bytes(path, 0, Some(0)).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<PutResponse> {
        let request = Request::BlockCreate {
            id: Some(BlockId::new(path)),
            content: bytes,
        };
        self.call_block(request).await?;
        Ok(())
    }

    async fn open_read_bytes(
        &self,
        path: &str,
        offset: u64,
        max_len: Option<u64>,
    ) -> StoreResult<Bytes> {
        let reply = self
            .call_block(Request::BlockRead {
                id: BlockId::new(path),
            })
            .await?;
        let content = reply.content.unwrap_or_default();
        let start = (offset as usize).min(content.len());
        let end = match max_len {
            Some(max) => start.saturating_add(max as usize).min(content.len()),
            None => content.len(),
        };
        Ok(content.slice(start..end))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        Ok(self.open_read_bytes(path, 0, None).await?.len() as u64)
    }

    async fn list(
        &self,
    ) -> StoreResult<Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>>
    {
        Err(StoreError::Unsupported("listing blocks over the wire"))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.call_block(Request::BlockDelete {
            id: BlockId::new(path),
        })
        .await?;
        Ok(())
    }
}
