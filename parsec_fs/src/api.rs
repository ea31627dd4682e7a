use bytes::Bytes;
use parsec_core::{EventKind, VlobId};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::{
    actor::{CoreHandle, FsOp},
    commands,
    context::FsContext,
    error::{FSResult, FsError},
    file::FileStat,
    gc::{PurgePolicy, PurgeReport},
    manifest::{DustbinEntry, FileManifestAccess, FolderEntry, Timestamp},
    path::FsPath,
    workspace::Workspace,
};

/// Metadata of a file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stat {
    File {
        created: Timestamp,
        updated: Timestamp,
        size: u64,
        version: u64,
    },
    Folder {
        created: Timestamp,
        updated: Timestamp,
        children: Vec<String>,
    },
}

impl Stat {
    pub fn is_file(&self) -> bool {
        matches!(self, Stat::File { .. })
    }

    pub fn created(&self) -> Timestamp {
        match self {
            Stat::File { created, .. } | Stat::Folder { created, .. } => *created,
        }
    }

    pub fn updated(&self) -> Timestamp {
        match self {
            Stat::File { updated, .. } | Stat::Folder { updated, .. } => *updated,
        }
    }

    /// File size, `None` for folders.
    pub fn size(&self) -> Option<u64> {
        match self {
            Stat::File { size, .. } => Some(*size),
            Stat::Folder { .. } => None,
        }
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            Stat::File { version, .. } => Some(*version),
            Stat::Folder { .. } => None,
        }
    }

    pub fn children(&self) -> &[String] {
        match self {
            Stat::File { .. } => &[],
            Stat::Folder { children, .. } => children,
        }
    }
}

/// A dustbin entry as shown to users: no capability, just where it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DustbinItem {
    pub id: VlobId,
    pub path: String,
    pub removed_at: Timestamp,
}

impl From<&DustbinEntry> for DustbinItem {
    fn from(entry: &DustbinEntry) -> Self {
        Self {
            id: entry.id().clone(),
            path: entry.path.clone(),
            removed_at: entry.removed_at,
        }
    }
}

/// A mounted Parsec filesystem.
///
/// Cheap to clone; every clone talks to the same core task. Paths are
/// absolute (`/a/b`). Handles returned by [`ParsecFs::in_group`] address a
/// group tree instead of the user's own.
#[derive(Clone, Debug)]
pub struct ParsecFs {
    core: CoreHandle,
    group: Option<String>,
}

fn parse(path: &str) -> FSResult<FsPath> {
    Ok(FsPath::parse(path)?)
}

impl ParsecFs {
    /// Loads the user manifest and starts the core task.
    ///
    /// A user without a manifest yet starts with an empty tree.
    pub async fn open(ctx: FsContext) -> FSResult<Self> {
        ctx.config
            .validate()
            .map_err(|err| FsError::BadParams(format!("{err:#}")))?;
        let user = ctx.identity.user_id().clone();
        ctx.vlobs
            .subscribe(EventKind::UserVlobUpdated, user.as_str())
            .await?;
        let workspace = Workspace::load_user(&ctx).await?;
        debug!(user = %user, version = workspace.version(), "filesystem opened");
        Ok(Self {
            core: CoreHandle::spawn(ctx, workspace),
            group: None,
        })
    }

    /// A handle on the tree of group `name`.
    pub fn in_group(&self, name: impl Into<String>) -> Self {
        Self {
            core: self.core.clone(),
            group: Some(name.into()),
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub async fn file_create(&self, path: &str) -> FSResult<()> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::FileCreate { path, responder })
            .await
    }

    /// Reads `size` bytes from `offset`, or up to the end when `size` is
    /// `None`. Reading past the end returns fewer bytes.
    pub async fn file_read(&self, path: &str, offset: u64, size: Option<u64>) -> FSResult<Bytes> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::FileRead {
                path,
                offset,
                size,
                responder,
            })
            .await
    }

    pub async fn file_write(&self, path: &str, offset: u64, data: impl Into<Bytes>) -> FSResult<()> {
        let path = parse(path)?;
        let data = data.into();
        self.core
            .op(self.group.clone(), |responder| FsOp::FileWrite {
                path,
                offset,
                data,
                responder,
            })
            .await
    }

    pub async fn file_truncate(&self, path: &str, length: u64) -> FSResult<()> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::FileTruncate {
                path,
                length,
                responder,
            })
            .await
    }

    pub async fn stat(&self, path: &str) -> FSResult<Stat> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::Stat { path, responder })
            .await
    }

    pub async fn folder_create(&self, path: &str) -> FSResult<()> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::FolderCreate { path, responder })
            .await
    }

    pub async fn move_entry(&self, src: &str, dst: &str) -> FSResult<()> {
        let (src, dst) = (parse(src)?, parse(dst)?);
        self.core
            .op(self.group.clone(), |responder| FsOp::Move {
                src,
                dst,
                responder,
            })
            .await
    }

    /// Moves a file, or every file below a folder, to the dustbin.
    pub async fn delete(&self, path: &str) -> FSResult<()> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::Delete { path, responder })
            .await
    }

    /// Stats of versions `first..=last`; `last` defaults to the latest.
    pub async fn history(&self, path: &str, first: u64, last: Option<u64>) -> FSResult<Vec<FileStat>> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::History {
                path,
                first,
                last,
                responder,
            })
            .await
    }

    /// Makes the content of `version` (default: the previous one) the new
    /// latest version.
    pub async fn restore(&self, path: &str, version: Option<u64>) -> FSResult<()> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::Restore {
                path,
                version,
                responder,
            })
            .await
    }

    /// Moves the file to a fresh vlob under a fresh key and returns the new
    /// capability. Anyone holding the old one loses access.
    pub async fn reencrypt(&self, path: &str) -> FSResult<FileManifestAccess> {
        let path = parse(path)?;
        self.core
            .op(self.group.clone(), |responder| FsOp::Reencrypt { path, responder })
            .await
    }

    pub async fn dustbin(&self) -> FSResult<Vec<DustbinItem>> {
        self.core
            .op(self.group.clone(), |responder| FsOp::Dustbin { responder })
            .await
    }

    /// Puts a dustbin entry back at its old path and returns that path.
    pub async fn undelete(&self, id: &VlobId) -> FSResult<FsPath> {
        let id = id.clone();
        self.core
            .op(self.group.clone(), |responder| FsOp::Undelete { id, responder })
            .await
    }

    /// Permanently deletes one dustbin entry. Returns the number of blocks
    /// deleted.
    pub async fn purge(&self, id: &VlobId) -> FSResult<usize> {
        let id = id.clone();
        self.core
            .op(self.group.clone(), |responder| FsOp::Purge { id, responder })
            .await
    }

    pub async fn purge_dustbin(&self, policy: Arc<dyn PurgePolicy>) -> FSResult<PurgeReport> {
        self.core
            .op(self.group.clone(), |responder| FsOp::PurgeDustbin { policy, responder })
            .await
    }

    pub async fn group_create(&self, name: &str) -> FSResult<()> {
        self.core.group_create(name.to_string()).await
    }

    /// Commits every pending change now.
    pub async fn synchronize(&self) -> FSResult<()> {
        self.core.synchronize().await
    }

    /// A snapshot of the whole folder tree.
    pub async fn tree(&self) -> FSResult<FolderEntry> {
        self.core
            .op(self.group.clone(), |responder| FsOp::Tree { responder })
            .await
    }

    /// Commits everything and stops the core task. Other clones of this
    /// handle fail afterwards.
    pub async fn shutdown(&self) -> FSResult<()> {
        self.core.shutdown().await
    }

    /// Runs one JSON command and returns the JSON response.
    pub async fn execute(&self, request: &str) -> String {
        commands::execute(self, request).await
    }
}
