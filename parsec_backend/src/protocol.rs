//! JSON wire protocol between a client and its backend.
//!
//! One JSON object per line. Requests carry a `cmd` tag, replies carry a
//! `status`. Events are pushed unsolicited as `{event, sender}` objects.
//! Binary fields (`blob`, `content`) are base64url without padding.

use bytes::Bytes;
use parsec_core::{
    BackendEvent, BlockId, EventKind, StoreError, TrustSeed, VlobError, VlobId,
};
use serde::{Deserialize, Serialize};

/// Longest accepted line on the wire.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    VlobCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<VlobId>,
        #[serde(with = "b64")]
        blob: Bytes,
    },
    VlobRead {
        id: VlobId,
        trust_seed: TrustSeed,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    VlobUpdate {
        id: VlobId,
        version: u64,
        trust_seed: TrustSeed,
        #[serde(with = "b64")]
        blob: Bytes,
    },
    VlobDelete {
        id: VlobId,
        trust_seed: TrustSeed,
    },
    UserVlobRead {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
    },
    UserVlobUpdate {
        version: u64,
        #[serde(with = "b64")]
        blob: Bytes,
    },
    BlockCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<BlockId>,
        #[serde(with = "b64")]
        content: Bytes,
    },
    BlockRead {
        id: BlockId,
    },
    BlockDelete {
        id: BlockId,
    },
    Subscribe {
        event: EventKind,
        sender: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ok,
    NotFound,
    BadParams,
    TrustSeedError,
    BadVersion,
    AlreadyExists,
    Offline,
    Crashed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_trust_seed: Option<TrustSeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_trust_seed: Option<TrustSeed>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64::option")]
    pub blob: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64::option")]
    pub content: Option<Bytes>,
}

/// Anything the server may write: a reply or a pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Reply(Reply),
    Event(BackendEvent),
}

impl Reply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(status: Status, label: impl Into<String>) -> Self {
        Self {
            status,
            label: Some(label.into()),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Converts an error reply into the client-side vlob error.
    ///
    /// `id` is the vlob the request addressed. Without one, the id echoed in
    /// the reply is used, and errors that name a vlob but have none left
    /// become plain backend errors.
    pub fn into_vlob_error(self, id: Option<&VlobId>) -> VlobError {
        let label = self.label.unwrap_or_default();
        let id = id.cloned().or_else(|| self.id.map(VlobId::new));
        match (self.status, id) {
            (Status::NotFound, Some(id)) => VlobError::NotFound(id),
            (Status::TrustSeedError, Some(id)) => VlobError::TrustSeed(id),
            (Status::AlreadyExists, Some(id)) => VlobError::AlreadyExists(id),
            (Status::BadVersion, _) => VlobError::BadVersion {
                current: self.version.unwrap_or_default(),
            },
            (Status::BadParams, _) => VlobError::BadParams(label),
            (Status::Offline, _) => VlobError::Offline(label),
            _ => VlobError::Backend(label),
        }
    }

    pub fn into_store_error(self) -> StoreError {
        let label = self.label.unwrap_or_default();
        match self.status {
            Status::NotFound => StoreError::NotFound,
            Status::Offline => StoreError::Offline(label),
            _ => StoreError::Other(anyhow::anyhow!("{:?}: {label}", self.status)),
        }
    }
}

impl From<VlobError> for Reply {
    fn from(err: VlobError) -> Self {
        let label = err.to_string();
        match err {
            VlobError::NotFound(_) => Reply::error(Status::NotFound, label),
            VlobError::TrustSeed(_) => Reply::error(Status::TrustSeedError, label),
            VlobError::BadVersion { current } => Reply {
                version: Some(current),
                ..Reply::error(Status::BadVersion, label)
            },
            VlobError::AlreadyExists(_) => Reply::error(Status::AlreadyExists, label),
            VlobError::BadParams(_) => Reply::error(Status::BadParams, label),
            VlobError::Offline(_) => Reply::error(Status::Offline, label),
            VlobError::Backend(_) => Reply::error(Status::Crashed, label),
        }
    }
}

impl From<StoreError> for Reply {
    fn from(err: StoreError) -> Self {
        let label = err.to_string();
        match err {
            StoreError::NotFound => Reply::error(Status::NotFound, label),
            StoreError::Offline(_) => Reply::error(Status::Offline, label),
            StoreError::Unsupported(_) => Reply::error(Status::BadParams, label),
            StoreError::Other(_) => Reply::error(Status::Crashed, label),
        }
    }
}

pub(crate) mod b64 {
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64_URL};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&B64_URL.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(d)?;
        B64_URL
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(bytes: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
            match bytes {
                Some(bytes) => s.serialize_some(&B64_URL.encode(bytes)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|encoded| {
                    B64_URL
                        .decode(encoded.as_bytes())
                        .map(Bytes::from)
                        .map_err(serde::de::Error::custom)
                })
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_use_cmd_tag_and_base64url() {
        let request = Request::VlobUpdate {
            id: VlobId::new("v1"),
            version: 2,
            trust_seed: TrustSeed::new("AAAAAAAAAAAAAAAA"),
            blob: Bytes::from_static(&[0xfb, 0xff]),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "cmd": "vlob_update",
                "id": "v1",
                "version": 2,
                "trust_seed": "AAAAAAAAAAAAAAAA",
                "blob": "-_8",
            })
        );
    }

    #[test]
    fn optional_fields_may_be_omitted() {
        let request: Request =
            serde_json::from_value(json!({"cmd": "user_vlob_read"})).unwrap();
        assert_eq!(request, Request::UserVlobRead { version: None });

        let request: Request =
            serde_json::from_value(json!({"cmd": "block_create", "content": ""})).unwrap();
        assert_eq!(
            request,
            Request::BlockCreate {
                id: None,
                content: Bytes::new()
            }
        );
    }

    #[test]
    fn vlob_errors_without_an_id_keep_the_label() {
        let reply = Reply::error(Status::NotFound, "no such vlob");
        assert!(matches!(
            reply.clone().into_vlob_error(None),
            VlobError::Backend(label) if label == "no such vlob"
        ));

        let echoed = Reply {
            id: Some("v7".into()),
            ..reply
        };
        assert!(matches!(
            echoed.into_vlob_error(None),
            VlobError::NotFound(id) if id == VlobId::new("v7")
        ));
        assert!(matches!(
            Reply::error(Status::Offline, "down").into_vlob_error(None),
            VlobError::Offline(_)
        ));
    }

    #[test]
    fn frames_distinguish_replies_from_events() {
        let reply: ServerFrame =
            serde_json::from_str(r#"{"status":"bad_version","version":3}"#).unwrap();
        let ServerFrame::Reply(reply) = reply else {
            panic!("expected a reply");
        };
        assert!(matches!(
            reply.into_vlob_error(Some(&VlobId::new("v"))),
            VlobError::BadVersion { current: 3 }
        ));

        let event: ServerFrame =
            serde_json::from_str(r#"{"event":"vlob_updated","sender":"v9"}"#).unwrap();
        assert_eq!(
            event,
            ServerFrame::Event(BackendEvent {
                event: EventKind::VlobUpdated,
                sender: "v9".into()
            })
        );
    }

    #[test]
    fn vlob_errors_map_to_statuses() {
        let reply = Reply::from(VlobError::TrustSeed(VlobId::new("x")));
        assert_eq!(reply.status, Status::TrustSeedError);
        let reply = Reply::from(VlobError::BadVersion { current: 7 });
        assert_eq!((reply.status, reply.version), (Status::BadVersion, Some(7)));
    }
}
