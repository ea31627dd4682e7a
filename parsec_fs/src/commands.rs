//! JSON command surface.
//!
//! One request is one JSON object with a `cmd` field. Every answer carries
//! `status`: `"ok"` plus the command's fields, or an error kind plus a
//! human readable `label`. Path commands accept an optional `group`.
//! Timestamps are RFC 3339 strings and file content is standard base64.

use base64::{Engine as _, engine::general_purpose::STANDARD as B64};
use chrono::{DateTime, SecondsFormat};
use parsec_core::VlobId;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{
    api::{ParsecFs, Stat},
    error::{FSResult, FsError},
    file::FileStat,
    manifest::{FileManifestAccess, Timestamp},
};

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Command {
    FileCreate {
        path: String,
    },
    FileRead {
        path: String,
        #[serde(default)]
        offset: i64,
        #[serde(default = "to_end")]
        size: i64,
    },
    FileWrite {
        path: String,
        content: String,
        #[serde(default)]
        offset: i64,
    },
    FileTruncate {
        path: String,
        length: i64,
    },
    Stat {
        path: String,
    },
    FolderCreate {
        path: String,
    },
    Move {
        src: String,
        dst: String,
    },
    Delete {
        path: String,
    },
    History {
        path: String,
        #[serde(default = "first_version")]
        first_version: i64,
        last_version: Option<i64>,
    },
    Restore {
        path: String,
        version: Option<i64>,
    },
    Reencrypt {
        path: String,
    },
    Synchronize,
    Dustbin,
    Undelete {
        id: String,
    },
    Purge {
        id: String,
    },
    GroupCreate {
        name: String,
    },
}

fn to_end() -> i64 {
    -1
}

fn first_version() -> i64 {
    1
}

fn non_negative(name: &str, value: i64) -> FSResult<u64> {
    u64::try_from(value).map_err(|_| FsError::BadParams(format!("{name} must be >= 0, got {value}")))
}

fn version_number(name: &str, value: i64) -> FSResult<u64> {
    match u64::try_from(value) {
        Ok(version) if version >= 1 => Ok(version),
        _ => Err(FsError::BadParams(format!("{name} must be >= 1, got {value}"))),
    }
}

fn absolute(path: &str) -> FSResult<&str> {
    if path.starts_with('/') {
        Ok(path)
    } else {
        Err(FsError::BadParams(format!("path must start with '/': {path:?}")))
    }
}

fn timestamp(micros: Timestamp) -> Value {
    match DateTime::from_timestamp_micros(micros) {
        Some(time) => Value::String(time.to_rfc3339_opts(SecondsFormat::Micros, true)),
        None => Value::Null,
    }
}

fn stat_fields(stat: &Stat) -> Value {
    match stat {
        Stat::File {
            created,
            updated,
            size,
            version,
        } => json!({
            "type": "file",
            "created": timestamp(*created),
            "updated": timestamp(*updated),
            "size": size,
            "version": version,
        }),
        Stat::Folder {
            created,
            updated,
            children,
        } => json!({
            "type": "folder",
            "created": timestamp(*created),
            "updated": timestamp(*updated),
            "children": children,
        }),
    }
}

fn history_item(stat: &FileStat) -> Value {
    json!({
        "version": stat.version,
        "created": timestamp(stat.created),
        "updated": timestamp(stat.updated),
        "size": stat.size,
    })
}

fn access_fields(access: &FileManifestAccess) -> Value {
    json!({
        "id": access.id,
        "read_trust_seed": access.read_trust_seed,
        "write_trust_seed": access.write_trust_seed,
        "key": B64.encode(access.key().as_bytes()),
    })
}

fn ok(fields: Value) -> Value {
    let mut body = match fields {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    body.insert("status".into(), Value::String("ok".into()));
    Value::Object(body)
}

fn failure(err: &FsError) -> Value {
    json!({ "status": err.status(), "label": err.to_string() })
}

/// Splits a raw request into the optional group and the command.
fn decode(request: &str) -> FSResult<(Option<String>, Command)> {
    let value: Value = serde_json::from_str(request)
        .map_err(|err| FsError::BadParams(format!("invalid JSON request: {err}")))?;
    let group = match value.get("group") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => {
            return Err(FsError::BadParams(format!("group must be a string, got {other}")));
        }
    };
    let command = serde_json::from_value(value)
        .map_err(|err| FsError::BadParams(format!("invalid command: {err}")))?;
    Ok((group, command))
}

async fn dispatch(fs: &ParsecFs, command: Command) -> FSResult<Value> {
    Ok(match command {
        Command::FileCreate { path } => {
            fs.file_create(absolute(&path)?).await?;
            json!({})
        }
        Command::FileRead { path, offset, size } => {
            let offset = non_negative("offset", offset)?;
            let size = match size {
                -1 => None,
                size => Some(non_negative("size", size)?),
            };
            let content = fs.file_read(absolute(&path)?, offset, size).await?;
            json!({ "content": B64.encode(&content) })
        }
        Command::FileWrite {
            path,
            content,
            offset,
        } => {
            let offset = non_negative("offset", offset)?;
            let data = B64
                .decode(content.as_bytes())
                .map_err(|err| FsError::BadParams(format!("content is not base64: {err}")))?;
            fs.file_write(absolute(&path)?, offset, data).await?;
            json!({})
        }
        Command::FileTruncate { path, length } => {
            let length = non_negative("length", length)?;
            fs.file_truncate(absolute(&path)?, length).await?;
            json!({})
        }
        Command::Stat { path } => stat_fields(&fs.stat(absolute(&path)?).await?),
        Command::FolderCreate { path } => {
            fs.folder_create(absolute(&path)?).await?;
            json!({})
        }
        Command::Move { src, dst } => {
            fs.move_entry(absolute(&src)?, absolute(&dst)?).await?;
            json!({})
        }
        Command::Delete { path } => {
            fs.delete(absolute(&path)?).await?;
            json!({})
        }
        Command::History {
            path,
            first_version: first,
            last_version: last,
        } => {
            let first = version_number("first_version", first)?;
            let last = last
                .map(|last| version_number("last_version", last))
                .transpose()?;
            if let Some(last) = last
                && first > last
            {
                return Err(FsError::BadParams(format!(
                    "first_version {first} is after last_version {last}"
                )));
            }
            let history = fs.history(absolute(&path)?, first, last).await?;
            json!({ "history": history.iter().map(history_item).collect::<Vec<_>>() })
        }
        Command::Restore { path, version } => {
            let version = version
                .map(|version| version_number("version", version))
                .transpose()?;
            fs.restore(absolute(&path)?, version).await?;
            json!({})
        }
        Command::Reencrypt { path } => access_fields(&fs.reencrypt(absolute(&path)?).await?),
        Command::Synchronize => {
            fs.synchronize().await?;
            json!({})
        }
        Command::Dustbin => {
            let items: Vec<Value> = fs
                .dustbin()
                .await?
                .iter()
                .map(|item| {
                    json!({
                        "id": item.id,
                        "path": item.path,
                        "removed_at": timestamp(item.removed_at),
                    })
                })
                .collect();
            json!({ "dustbin": items })
        }
        Command::Undelete { id } => {
            let path = fs.undelete(&VlobId::new(id)).await?;
            json!({ "path": path.to_string() })
        }
        Command::Purge { id } => {
            let blocks = fs.purge(&VlobId::new(id)).await?;
            json!({ "blocks_deleted": blocks })
        }
        Command::GroupCreate { name } => {
            fs.group_create(&name).await?;
            json!({})
        }
    })
}

/// Runs one request against `fs` and renders the response.
pub async fn execute(fs: &ParsecFs, request: &str) -> String {
    let result = match decode(request) {
        Ok((group, command)) => {
            debug!(?command, group = ?group, "executing command");
            let target = match group {
                Some(name) => fs.in_group(name),
                None => fs.clone(),
            };
            dispatch(&target, command).await
        }
        Err(err) => Err(err),
    };
    let response = match result {
        Ok(fields) => ok(fields),
        Err(err) => failure(&err),
    };
    response.to_string()
}
