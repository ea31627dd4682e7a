//! The core actor: sole owner of the workspaces and cached file states.
//!
//! Every API call becomes a message processed sequentially, so writes to a
//! file are applied and committed in issue order. The synchronizer talks
//! to the actor through the same channel.

use bytes::Bytes;
use parsec_core::{EventKind, VlobId};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::{
    api::{DustbinItem, Stat},
    context::FsContext,
    error::{FSResult, FsError, PathError},
    file::{FileStat, FileState, history, retire_vlob},
    gc::{PurgePolicy, PurgeReport, purge_entry},
    manifest::{Entry, FileManifestAccess, FolderEntry},
    path::FsPath,
    sync::{JournalKey, SyncMessage, Synchronizer},
    workspace::{EntryRef, Workspace},
};

type Responder<T> = oneshot::Sender<FSResult<T>>;

#[derive(Debug)]
pub(crate) enum CoreMessage {
    /// An operation inside the user tree (`group == None`) or a group tree.
    Op { group: Option<String>, op: FsOp },
    GroupCreate {
        name: String,
        responder: Responder<()>,
    },
    /// Commits every pending change right away.
    Synchronize { responder: Responder<()> },
    /// Commits one path and everything below it. Sent by the synchronizer.
    CommitPath {
        key: JournalKey,
        responder: Responder<()>,
    },
    RemoteVlobChanged { id: VlobId },
    RemoteUserChanged,
    /// Events were lost; forget every clean cached file.
    RemoteResync,
    Shutdown { responder: Responder<()> },
}

#[derive(Debug)]
pub(crate) enum FsOp {
    FileCreate {
        path: FsPath,
        responder: Responder<()>,
    },
    FileRead {
        path: FsPath,
        offset: u64,
        size: Option<u64>,
        responder: Responder<Bytes>,
    },
    FileWrite {
        path: FsPath,
        offset: u64,
        data: Bytes,
        responder: Responder<()>,
    },
    FileTruncate {
        path: FsPath,
        length: u64,
        responder: Responder<()>,
    },
    Stat {
        path: FsPath,
        responder: Responder<Stat>,
    },
    FolderCreate {
        path: FsPath,
        responder: Responder<()>,
    },
    Move {
        src: FsPath,
        dst: FsPath,
        responder: Responder<()>,
    },
    Delete {
        path: FsPath,
        responder: Responder<()>,
    },
    History {
        path: FsPath,
        first: u64,
        last: Option<u64>,
        responder: Responder<Vec<FileStat>>,
    },
    Restore {
        path: FsPath,
        version: Option<u64>,
        responder: Responder<()>,
    },
    Reencrypt {
        path: FsPath,
        responder: Responder<FileManifestAccess>,
    },
    Dustbin {
        responder: Responder<Vec<DustbinItem>>,
    },
    Undelete {
        id: VlobId,
        responder: Responder<FsPath>,
    },
    Purge {
        id: VlobId,
        responder: Responder<usize>,
    },
    PurgeDustbin {
        policy: Arc<dyn PurgePolicy>,
        responder: Responder<PurgeReport>,
    },
    Tree {
        responder: Responder<FolderEntry>,
    },
}

/// Disjoint borrows of the actor state needed by most operations.
struct Parts<'a> {
    ctx: &'a FsContext,
    ws: &'a mut Workspace,
    files: &'a mut HashMap<VlobId, FileState>,
}

struct CoreActor {
    ctx: FsContext,
    receiver: mpsc::Receiver<CoreMessage>,
    user: Workspace,
    groups: HashMap<String, Workspace>,
    files: HashMap<VlobId, FileState>,
    /// Vlobs of re-encrypted files, deleted once the tree of their group
    /// has been saved without them.
    retired: Vec<(Option<String>, FileManifestAccess)>,
    sync: Option<mpsc::UnboundedSender<SyncMessage>>,
}

fn parent_of(path: &FsPath) -> FsPath {
    path.parent().unwrap_or_default()
}

async fn subscribe(ctx: &FsContext, id: &VlobId) {
    if let Err(err) = ctx.vlobs.subscribe(EventKind::VlobUpdated, id.as_str()).await {
        warn!(vlob = %id, "could not subscribe to vlob events: {err}");
    }
}

/// Returns the cached state of `access`, loading it on first use.
async fn file_state<'a>(
    ctx: &FsContext,
    files: &'a mut HashMap<VlobId, FileState>,
    access: &FileManifestAccess,
) -> FSResult<&'a mut FileState> {
    if !files.contains_key(&access.id) {
        let state = FileState::load(ctx, access).await?;
        subscribe(ctx, &access.id).await;
        files.insert(access.id.clone(), state);
    }
    files
        .get_mut(&access.id)
        .ok_or_else(|| FsError::Internal(format!("file state of {} vanished", access.id)))
}

impl CoreActor {
    async fn run(&mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                CoreMessage::Shutdown { responder } => {
                    let result = self.commit_all().await;
                    if let Err(err) = &result {
                        error!("synchronization on shutdown failed: {err}");
                    }
                    let _ = responder.send(result);
                    return;
                }
                msg => self.process(msg).await,
            }
        }

        // Every handle is gone: last chance to push local changes.
        if let Err(err) = self.commit_all().await {
            error!("final synchronization failed: {err}");
        }
    }

    async fn process(&mut self, msg: CoreMessage) {
        match msg {
            CoreMessage::Op { group, op } => self.process_op(group, op).await,
            CoreMessage::GroupCreate { name, responder } => {
                let _ = responder.send(self.group_create(name).await);
            }
            CoreMessage::Synchronize { responder } => {
                let result = self.commit_all().await;
                if result.is_ok()
                    && let Some(sync) = &self.sync
                {
                    let _ = sync.send(SyncMessage::Clear);
                }
                let _ = responder.send(result);
            }
            CoreMessage::CommitPath { key, responder } => {
                let _ = responder.send(self.commit_key(&key).await);
            }
            CoreMessage::RemoteVlobChanged { id } => self.remote_vlob_changed(&id).await,
            CoreMessage::RemoteUserChanged => {
                match self.user.reload(&self.ctx).await {
                    Ok(true) => debug!("user workspace reloaded after remote change"),
                    Ok(false) => {}
                    Err(err) => warn!("could not reload user workspace: {err}"),
                }
            }
            CoreMessage::RemoteResync => self.files.retain(|_, state| state.is_dirty()),
            CoreMessage::Shutdown { .. } => {
                // Handled in the run loop.
            }
        }
    }

    async fn process_op(&mut self, group: Option<String>, op: FsOp) {
        match op {
            FsOp::FileCreate { path, responder } => {
                let _ = responder.send(self.file_create(group, path).await);
            }
            FsOp::FileRead {
                path,
                offset,
                size,
                responder,
            } => {
                let _ = responder.send(self.file_read(group, path, offset, size).await);
            }
            FsOp::FileWrite {
                path,
                offset,
                data,
                responder,
            } => {
                let _ = responder.send(self.file_write(group, path, offset, data).await);
            }
            FsOp::FileTruncate {
                path,
                length,
                responder,
            } => {
                let _ = responder.send(self.file_truncate(group, path, length).await);
            }
            FsOp::Stat { path, responder } => {
                let _ = responder.send(self.stat(group, path).await);
            }
            FsOp::FolderCreate { path, responder } => {
                let _ = responder.send(self.folder_create(group, path).await);
            }
            FsOp::Move {
                src,
                dst,
                responder,
            } => {
                let _ = responder.send(self.move_entry(group, src, dst).await);
            }
            FsOp::Delete { path, responder } => {
                let _ = responder.send(self.delete(group, path).await);
            }
            FsOp::History {
                path,
                first,
                last,
                responder,
            } => {
                let _ = responder.send(self.history(group, path, first, last).await);
            }
            FsOp::Restore {
                path,
                version,
                responder,
            } => {
                let _ = responder.send(self.restore(group, path, version).await);
            }
            FsOp::Reencrypt { path, responder } => {
                let _ = responder.send(self.reencrypt(group, path).await);
            }
            FsOp::Dustbin { responder } => {
                let _ = responder.send(self.dustbin(group).await);
            }
            FsOp::Undelete { id, responder } => {
                let _ = responder.send(self.undelete(group, id).await);
            }
            FsOp::Purge { id, responder } => {
                let _ = responder.send(self.purge(group, id).await);
            }
            FsOp::PurgeDustbin { policy, responder } => {
                let _ = responder.send(self.purge_dustbin(group, policy).await);
            }
            FsOp::Tree { responder } => {
                let result = async {
                    let parts = self.parts(&group).await?;
                    Ok(parts.ws.tree().root.clone())
                }
                .await;
                let _ = responder.send(result);
            }
        }
    }

    /// Loads the group workspace on first use and splits the state into
    /// disjoint borrows.
    async fn parts(&mut self, group: &Option<String>) -> FSResult<Parts<'_>> {
        let ws = match group {
            None => &mut self.user,
            Some(name) => {
                if !self.groups.contains_key(name) {
                    let access = self
                        .user
                        .tree()
                        .groups
                        .get(name)
                        .cloned()
                        .ok_or_else(|| PathError::NotFound(format!("group {name}")))?;
                    let ws = Workspace::load_group(&self.ctx, name, &access).await?;
                    subscribe(&self.ctx, &access.id).await;
                    self.groups.insert(name.clone(), ws);
                }
                self.groups
                    .get_mut(name)
                    .ok_or_else(|| FsError::Internal(format!("group {name} vanished")))?
            }
        };
        Ok(Parts {
            ctx: &self.ctx,
            ws,
            files: &mut self.files,
        })
    }

    /// Schedules the change for synchronization, or commits it right away
    /// when the synchronizer is off.
    async fn after_change(&mut self, group: Option<String>, path: FsPath) -> FSResult<()> {
        let key = JournalKey::new(group, path);
        if self.ctx.config.auto_sync
            && let Some(sync) = &self.sync
        {
            let _ = sync.send(SyncMessage::Changed(key));
            return Ok(());
        }
        self.commit_key(&key).await
    }

    async fn commit_key(&mut self, key: &JournalKey) -> FSResult<()> {
        {
            let Parts { ctx, ws, files } = self.parts(&key.group).await?;
            let ids: Vec<VlobId> = match ws.tree().lookup(&key.path)? {
                EntryRef::File(access) => vec![access.id.clone()],
                EntryRef::Folder(folder) => folder
                    .files()
                    .into_iter()
                    .map(|(_, access)| access.id.clone())
                    .collect(),
            };
            for id in ids {
                if let Some(state) = files.get_mut(&id) {
                    state.commit(ctx).await?;
                }
            }
            ws.save(ctx).await?;
        }
        self.retire_saved(Some(&key.group)).await;
        Ok(())
    }

    async fn commit_all(&mut self) -> FSResult<()> {
        for state in self.files.values_mut().filter(|state| state.is_dirty()) {
            state.commit(&self.ctx).await?;
        }
        for ws in self.groups.values_mut() {
            ws.save(&self.ctx).await?;
        }
        self.user.save(&self.ctx).await?;
        self.retire_saved(None).await;
        Ok(())
    }

    /// Deletes the retired vlobs of `group`, or of every group with `None`.
    /// Only call this right after the matching trees were saved.
    async fn retire_saved(&mut self, group: Option<&Option<String>>) {
        let (saved, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retired)
            .into_iter()
            .partition(|(owner, _)| group.is_none_or(|group| owner == group));
        self.retired = waiting;
        for (_, access) in saved {
            retire_vlob(&self.ctx, &access).await;
        }
    }

    async fn remote_vlob_changed(&mut self, id: &VlobId) {
        if self.files.get(id).is_some_and(|state| !state.is_dirty()) {
            debug!(vlob = %id, "dropping cached file after remote change");
            self.files.remove(id);
        }
        for ws in self.groups.values_mut() {
            if ws.group_access().is_some_and(|access| &access.id == id)
                && let Err(err) = ws.reload(&self.ctx).await
            {
                warn!(vlob = %id, "could not reload group workspace: {err}");
            }
        }
    }

    async fn file_create(&mut self, group: Option<String>, path: FsPath) -> FSResult<()> {
        let Parts { ctx, ws, files } = self.parts(&group).await?;
        ws.tree().check_insert(&path)?;
        let state = FileState::create(ctx).await?;
        let access = state.access().clone();
        ws.insert(ctx, &path, Entry::File(access.clone()))?;
        files.insert(access.id.clone(), state);
        subscribe(ctx, &access.id).await;
        self.after_change(group, parent_of(&path)).await
    }

    async fn file_read(
        &mut self,
        group: Option<String>,
        path: FsPath,
        offset: u64,
        size: Option<u64>,
    ) -> FSResult<Bytes> {
        let Parts { ctx, ws, files } = self.parts(&group).await?;
        let access = ws.tree().file(&path)?.clone();
        let state = file_state(ctx, files, &access).await?;
        state.read(ctx, offset, size).await
    }

    async fn file_write(
        &mut self,
        group: Option<String>,
        path: FsPath,
        offset: u64,
        data: Bytes,
    ) -> FSResult<()> {
        if data.is_empty() {
            // Still report a missing path.
            let parts = self.parts(&group).await?;
            parts.ws.tree().file(&path)?;
            return Ok(());
        }
        {
            let Parts { ctx, ws, files } = self.parts(&group).await?;
            let access = ws.tree().file(&path)?.clone();
            file_state(ctx, files, &access)
                .await?
                .write(ctx, offset, data)
                .await?;
        }
        self.after_change(group, path).await
    }

    async fn file_truncate(&mut self, group: Option<String>, path: FsPath, length: u64) -> FSResult<()> {
        let shrinks = {
            let Parts { ctx, ws, files } = self.parts(&group).await?;
            let access = ws.tree().file(&path)?.clone();
            let state = file_state(ctx, files, &access).await?;
            let shrinks = length < state.size();
            state.truncate(ctx, length).await?;
            shrinks
        };
        if shrinks {
            self.after_change(group, path).await?;
        }
        Ok(())
    }

    async fn stat(&mut self, group: Option<String>, path: FsPath) -> FSResult<Stat> {
        let Parts { ctx, ws, files } = self.parts(&group).await?;
        let access = match ws.tree().lookup(&path)? {
            EntryRef::Folder(folder) => {
                return Ok(Stat::Folder {
                    created: folder.created,
                    updated: folder.updated,
                    children: folder.children.keys().cloned().collect(),
                });
            }
            EntryRef::File(access) => access.clone(),
        };
        let stat = file_state(ctx, files, &access).await?.stat();
        Ok(Stat::File {
            created: stat.created,
            updated: stat.updated,
            size: stat.size,
            version: stat.version,
        })
    }

    async fn folder_create(&mut self, group: Option<String>, path: FsPath) -> FSResult<()> {
        {
            let Parts { ctx, ws, .. } = self.parts(&group).await?;
            ws.create_folder(ctx, &path)?;
        }
        self.after_change(group, parent_of(&path)).await
    }

    async fn move_entry(&mut self, group: Option<String>, src: FsPath, dst: FsPath) -> FSResult<()> {
        {
            let Parts { ctx, ws, .. } = self.parts(&group).await?;
            ws.move_entry(ctx, &src, &dst)?;
        }
        let (from, to) = (parent_of(&src), parent_of(&dst));
        if from != to {
            self.after_change(group.clone(), from).await?;
        }
        self.after_change(group, to).await
    }

    async fn delete(&mut self, group: Option<String>, path: FsPath) -> FSResult<()> {
        {
            let Parts { ctx, ws, files } = self.parts(&group).await?;
            let ids: Vec<VlobId> = match ws.tree().lookup(&path)? {
                EntryRef::File(access) => vec![access.id.clone()],
                EntryRef::Folder(folder) => folder
                    .files()
                    .into_iter()
                    .map(|(_, access)| access.id.clone())
                    .collect(),
            };
            // The dustbin keeps committed content only.
            for id in &ids {
                if let Some(state) = files.get_mut(id) {
                    state.commit(ctx).await?;
                }
            }
            let removed = ws.delete(ctx, &path)?;
            debug!(path = %path, files = removed.len(), "moved to dustbin");
        }
        self.after_change(group, parent_of(&path)).await
    }

    async fn history(
        &mut self,
        group: Option<String>,
        path: FsPath,
        first: u64,
        last: Option<u64>,
    ) -> FSResult<Vec<FileStat>> {
        let Parts { ctx, ws, .. } = self.parts(&group).await?;
        let access = ws.tree().file(&path)?.clone();
        history(ctx, &access, first, last).await
    }

    async fn restore(&mut self, group: Option<String>, path: FsPath, version: Option<u64>) -> FSResult<()> {
        let Parts { ctx, ws, files } = self.parts(&group).await?;
        let access = ws.tree().file(&path)?.clone();
        file_state(ctx, files, &access)
            .await?
            .restore(ctx, version)
            .await
    }

    /// The old vlob stays readable until the tree pointing at the new one
    /// has been saved, so a failed save never strands the file.
    async fn reencrypt(&mut self, group: Option<String>, path: FsPath) -> FSResult<FileManifestAccess> {
        let (old, new) = {
            let Parts { ctx, ws, files } = self.parts(&group).await?;
            let old = ws.tree().file(&path)?.clone();
            let new = file_state(ctx, files, &old).await?.reencrypt(ctx).await?;
            if let Some(state) = files.remove(&old.id) {
                files.insert(new.id.clone(), state);
            }
            ws.replace_access(ctx, &old.id, new.clone())?;
            subscribe(ctx, &new.id).await;
            (old, new)
        };
        self.retired.push((group.clone(), old));
        self.after_change(group, parent_of(&path)).await?;
        Ok(new)
    }

    async fn dustbin(&mut self, group: Option<String>) -> FSResult<Vec<DustbinItem>> {
        let parts = self.parts(&group).await?;
        Ok(parts.ws.tree().dustbin.iter().map(DustbinItem::from).collect())
    }

    async fn undelete(&mut self, group: Option<String>, id: VlobId) -> FSResult<FsPath> {
        let path = {
            let Parts { ctx, ws, .. } = self.parts(&group).await?;
            ws.undelete(ctx, &id)?
        };
        self.after_change(group, parent_of(&path)).await?;
        Ok(path)
    }

    /// Removes the entry from the dustbin, saves the tree, then deletes the
    /// file data. Returns the number of deleted blocks.
    async fn purge(&mut self, group: Option<String>, id: VlobId) -> FSResult<usize> {
        let Parts { ctx, ws, files } = self.parts(&group).await?;
        let entry = ws.purge(&id)?;
        ws.save(ctx).await?;
        files.remove(&id);
        purge_entry(ctx, &entry).await
    }

    async fn purge_dustbin(
        &mut self,
        group: Option<String>,
        policy: Arc<dyn PurgePolicy>,
    ) -> FSResult<PurgeReport> {
        let selected = {
            let parts = self.parts(&group).await?;
            policy.select(&parts.ws.tree().dustbin, parts.ctx.now())
        };
        let mut report = PurgeReport::default();
        for id in selected {
            match self.purge(group.clone(), id.clone()).await {
                Ok(blocks) => {
                    report.blocks_deleted += blocks;
                    report.purged.push(id);
                }
                Err(err) => {
                    warn!(vlob = %id, "purge failed: {err}");
                    report.failed.push((id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn group_create(&mut self, name: String) -> FSResult<()> {
        if name.is_empty() {
            return Err(FsError::BadParams("group name must not be empty".into()));
        }
        if self.user.tree().groups.contains_key(&name) {
            return Err(PathError::AlreadyExists(format!("group {name}")).into());
        }
        let group = Workspace::create_group(&self.ctx, &name).await?;
        let access = group
            .group_access()
            .cloned()
            .ok_or_else(|| FsError::Internal("group workspace without access".into()))?;
        self.user.add_group(&self.ctx, &name, access.clone())?;
        subscribe(&self.ctx, &access.id).await;
        self.groups.insert(name, group);
        self.after_change(None, FsPath::root()).await
    }
}

/// A handle for communicating with the core actor.
#[derive(Clone, Debug)]
pub(crate) struct CoreHandle {
    sender: mpsc::Sender<CoreMessage>,
}

impl CoreHandle {
    /// Spawns the actor and its synchronizer.
    pub(crate) fn spawn(ctx: FsContext, user: Workspace) -> Self {
        let (sender, receiver) = mpsc::channel(1024);
        let handle = Self { sender };
        let sync = Synchronizer::spawn(
            handle.downgrade(),
            ctx.vlobs.events().clone(),
            ctx.identity.user_id().clone(),
            &ctx.config,
        );
        let mut actor = CoreActor {
            ctx,
            receiver,
            user,
            groups: HashMap::new(),
            files: HashMap::new(),
            retired: Vec::new(),
            sync: Some(sync),
        };
        tokio::spawn(async move {
            actor.run().await;
        });
        handle
    }

    async fn send_msg(&self, msg: CoreMessage) -> FSResult<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| FsError::Internal("filesystem core has stopped".into()))
    }

    async fn request<T>(&self, make: impl FnOnce(Responder<T>) -> CoreMessage) -> FSResult<T> {
        let (responder, receiver) = oneshot::channel();
        self.send_msg(make(responder)).await?;
        receiver
            .await
            .map_err(|_| FsError::Internal("filesystem core dropped the request".into()))?
    }

    pub(crate) async fn op<T>(
        &self,
        group: Option<String>,
        make: impl FnOnce(Responder<T>) -> FsOp,
    ) -> FSResult<T> {
        self.request(|responder| CoreMessage::Op {
            group,
            op: make(responder),
        })
        .await
    }

    pub(crate) async fn group_create(&self, name: String) -> FSResult<()> {
        self.request(|responder| CoreMessage::GroupCreate { name, responder })
            .await
    }

    pub(crate) async fn synchronize(&self) -> FSResult<()> {
        self.request(|responder| CoreMessage::Synchronize { responder })
            .await
    }

    pub(crate) async fn commit_path(&self, key: JournalKey) -> FSResult<()> {
        self.request(|responder| CoreMessage::CommitPath { key, responder })
            .await
    }

    pub(crate) async fn remote_vlob_changed(&self, id: VlobId) {
        let _ = self.send_msg(CoreMessage::RemoteVlobChanged { id }).await;
    }

    pub(crate) async fn remote_user_changed(&self) {
        let _ = self.send_msg(CoreMessage::RemoteUserChanged).await;
    }

    pub(crate) async fn remote_resync(&self) {
        let _ = self.send_msg(CoreMessage::RemoteResync).await;
    }

    pub(crate) async fn shutdown(&self) -> FSResult<()> {
        self.request(|responder| CoreMessage::Shutdown { responder })
            .await
    }

    pub(crate) fn downgrade(&self) -> WeakCoreHandle {
        WeakCoreHandle {
            sender: self.sender.downgrade(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct WeakCoreHandle {
    sender: mpsc::WeakSender<CoreMessage>,
}

impl WeakCoreHandle {
    pub(crate) fn upgrade(&self) -> Option<CoreHandle> {
        self.sender.upgrade().map(|sender| CoreHandle { sender })
    }
}
