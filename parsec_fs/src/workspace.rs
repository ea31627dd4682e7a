//! Workspace engine: the folder tree of the user (or of a group), its
//! dustbin, and persistence of that tree in a vlob.
//!
//! Tree operations are recorded as [`TreeOp`]s until saved. When the save
//! loses an optimistic-concurrency race the remote tree is fetched and the
//! recorded operations are replayed on it. Replay never overwrites: an
//! entry whose destination is taken lands under `<name>.conflict`.

use parsec_core::{VlobError, VlobId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::{
    context::FsContext,
    error::{FSResult, FsError, PathError},
    manifest::{
        DustbinEntry, Entry, FileManifestAccess, FolderEntry, GroupManifest, Timestamp,
        UserManifest, VlobAccess, open_manifest, open_user_manifest, seal_manifest,
        seal_user_manifest,
    },
    path::FsPath,
};

const CONFLICT_SUFFIX: &str = ".conflict";

/// A resolved tree entry.
#[derive(Debug, Clone, Copy)]
pub enum EntryRef<'a> {
    File(&'a FileManifestAccess),
    Folder(&'a FolderEntry),
}

#[derive(Debug, Clone)]
pub enum TreeOp {
    Insert { path: FsPath, entry: Entry },
    Move { src: FsPath, dst: FsPath },
    /// `file` pins the deleted file so a replay never removes another one.
    Delete { path: FsPath, file: Option<VlobId> },
    Undelete { id: VlobId },
    Purge { id: VlobId },
    AddGroup { name: String, access: VlobAccess },
    ReplaceAccess { old: VlobId, new: VlobAccess },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Strict,
    Replay,
}

/// Root folder, dustbin and (for users) group references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub root: FolderEntry,
    pub dustbin: Vec<DustbinEntry>,
    pub groups: BTreeMap<String, VlobAccess>,
}

fn not_found(path: &FsPath) -> PathError {
    PathError::NotFound(path.to_string())
}

fn folder_mut<'a>(
    root: &'a mut FolderEntry,
    parts: &[String],
    full: &FsPath,
) -> Result<&'a mut FolderEntry, PathError> {
    let mut folder = root;
    for part in parts {
        folder = match folder.children.get_mut(part) {
            Some(Entry::Folder(sub)) => sub,
            Some(Entry::File(_)) => return Err(PathError::NotAFolder(full.to_string())),
            None => return Err(not_found(full)),
        };
    }
    Ok(folder)
}

fn split(path: &FsPath) -> Result<(FsPath, &str), PathError> {
    match (path.parent(), path.name()) {
        (Some(parent), Some(name)) => Ok((parent, name)),
        _ => Err(PathError::Invalid("the root has no parent".into())),
    }
}

/// First of `name`, `name.conflict`, `name.conflict.conflict`, ... that is
/// free in `folder`.
fn free_name(folder: &FolderEntry, name: &str) -> String {
    let mut candidate = name.to_string();
    while folder.children.contains_key(&candidate) {
        candidate.push_str(CONFLICT_SUFFIX);
    }
    candidate
}

fn replace_in_folder(folder: &mut FolderEntry, old: &VlobId, new: &VlobAccess) -> bool {
    let mut replaced = false;
    for child in folder.children.values_mut() {
        match child {
            Entry::File(access) if &access.id == old => {
                *access = new.clone();
                replaced = true;
            }
            Entry::File(_) => {}
            Entry::Folder(sub) => replaced |= replace_in_folder(sub, old, new),
        }
    }
    replaced
}

impl Tree {
    pub fn new(now: Timestamp) -> Self {
        Self {
            root: FolderEntry::new(now),
            dustbin: Vec::new(),
            groups: BTreeMap::new(),
        }
    }

    pub fn lookup(&self, path: &FsPath) -> Result<EntryRef<'_>, PathError> {
        let mut current = EntryRef::Folder(&self.root);
        for part in path.parts() {
            let EntryRef::Folder(folder) = current else {
                return Err(PathError::NotAFolder(path.to_string()));
            };
            current = match folder.children.get(part) {
                Some(Entry::File(access)) => EntryRef::File(access),
                Some(Entry::Folder(sub)) => EntryRef::Folder(sub),
                None => return Err(not_found(path)),
            };
        }
        Ok(current)
    }

    pub fn folder(&self, path: &FsPath) -> Result<&FolderEntry, PathError> {
        match self.lookup(path)? {
            EntryRef::Folder(folder) => Ok(folder),
            EntryRef::File(_) => Err(PathError::NotAFolder(path.to_string())),
        }
    }

    pub fn file(&self, path: &FsPath) -> Result<&FileManifestAccess, PathError> {
        match self.lookup(path)? {
            EntryRef::File(access) => Ok(access),
            EntryRef::Folder(_) => Err(PathError::NotAFile(path.to_string())),
        }
    }

    pub fn dustbin_entry(&self, id: &VlobId) -> Result<&DustbinEntry, PathError> {
        self.dustbin
            .iter()
            .find(|entry| entry.id() == id)
            .ok_or_else(|| PathError::NotFound(format!("dustbin entry {id}")))
    }

    /// Checks that `path` could be inserted without touching the tree.
    pub fn check_insert(&self, path: &FsPath) -> Result<(), PathError> {
        if path.is_root() {
            return Err(PathError::AlreadyExists(path.to_string()));
        }
        let (parent, name) = split(path)?;
        if self.folder(&parent)?.children.contains_key(name) {
            return Err(PathError::AlreadyExists(path.to_string()));
        }
        Ok(())
    }

    fn insert(
        &mut self,
        path: &FsPath,
        entry: Entry,
        now: Timestamp,
        mode: Mode,
    ) -> Result<FsPath, PathError> {
        if path.is_root() {
            return Err(PathError::AlreadyExists(path.to_string()));
        }
        let (parent_path, name) = split(path)?;
        let parent = folder_mut(&mut self.root, parent_path.parts(), &parent_path)?;
        let name = match (parent.children.contains_key(name), mode) {
            (false, _) => name.to_string(),
            (true, Mode::Strict) => return Err(PathError::AlreadyExists(path.to_string())),
            (true, Mode::Replay) => free_name(parent, name),
        };
        parent.children.insert(name.clone(), entry);
        parent.updated = now;
        Ok(parent_path.join(&name))
    }

    fn remove(&mut self, path: &FsPath, now: Timestamp) -> Result<Entry, PathError> {
        let (parent_path, name) = split(path)?;
        let parent = folder_mut(&mut self.root, parent_path.parts(), path)?;
        let entry = parent.children.remove(name).ok_or_else(|| not_found(path))?;
        parent.updated = now;
        Ok(entry)
    }

    fn move_entry(
        &mut self,
        src: &FsPath,
        dst: &FsPath,
        now: Timestamp,
        mode: Mode,
    ) -> Result<FsPath, PathError> {
        if src.is_root() {
            return Err(PathError::Invalid("cannot move the root".into()));
        }
        if dst.starts_with(src) {
            return Err(PathError::Invalid(format!("cannot move {src} into {dst}")));
        }
        self.lookup(src)?;
        let (dst_parent, _) = split(dst)?;
        self.folder(&dst_parent)?;
        if mode == Mode::Strict {
            self.check_insert(dst)?;
        }
        let entry = self.remove(src, now)?;
        self.insert(dst, entry, now, Mode::Replay)
    }

    fn delete(
        &mut self,
        path: &FsPath,
        now: Timestamp,
        expected: Option<&VlobId>,
    ) -> Result<Vec<DustbinEntry>, PathError> {
        if path.is_root() {
            return Err(PathError::Invalid("cannot delete the root".into()));
        }
        if let Some(expected) = expected
            && self.file(path)?.id != *expected
        {
            return Err(not_found(path));
        }
        let removed: Vec<DustbinEntry> = match self.remove(path, now)? {
            Entry::File(access) => vec![DustbinEntry {
                path: path.to_string(),
                removed_at: now,
                access,
            }],
            Entry::Folder(folder) => folder
                .files()
                .into_iter()
                .map(|(parts, access)| DustbinEntry {
                    path: parts
                        .iter()
                        .fold(path.clone(), |acc, part| acc.join(part))
                        .to_string(),
                    removed_at: now,
                    access: access.clone(),
                })
                .collect(),
        };
        self.dustbin.extend(removed.iter().cloned());
        Ok(removed)
    }

    fn undelete(&mut self, id: &VlobId, now: Timestamp, mode: Mode) -> FSResult<FsPath> {
        let entry = self.dustbin_entry(id)?.clone();
        let path = FsPath::parse(&entry.path)?;
        if mode == Mode::Strict {
            match self.lookup(&path) {
                Ok(_) => return Err(PathError::AlreadyExists(path.to_string()).into()),
                Err(PathError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let (parent, _) = split(&path)?;
        let mut folder = &mut self.root;
        for part in parent.parts() {
            let child = folder
                .children
                .entry(part.clone())
                .or_insert_with(|| Entry::Folder(FolderEntry::new(now)));
            folder = match child {
                Entry::Folder(sub) => sub,
                Entry::File(_) => return Err(PathError::NotAFolder(parent.to_string()).into()),
            };
        }

        let restored = self.insert(&path, Entry::File(entry.access), now, mode)?;
        self.dustbin.retain(|e| e.id() != id);
        Ok(restored)
    }

    fn purge(&mut self, id: &VlobId) -> Result<DustbinEntry, PathError> {
        let index = self
            .dustbin
            .iter()
            .position(|entry| entry.id() == id)
            .ok_or_else(|| PathError::NotFound(format!("dustbin entry {id}")))?;
        Ok(self.dustbin.remove(index))
    }

    fn add_group(&mut self, name: &str, access: VlobAccess, mode: Mode) -> Result<(), PathError> {
        if self.groups.contains_key(name) {
            if mode == Mode::Strict {
                return Err(PathError::AlreadyExists(format!("group {name}")));
            }
            let mut renamed = name.to_string();
            while self.groups.contains_key(&renamed) {
                renamed.push_str(CONFLICT_SUFFIX);
            }
            self.groups.insert(renamed, access);
            return Ok(());
        }
        self.groups.insert(name.to_string(), access);
        Ok(())
    }

    fn replace_access(&mut self, old: &VlobId, new: &VlobAccess) -> bool {
        let mut replaced = replace_in_folder(&mut self.root, old, new);
        for entry in self.dustbin.iter_mut().filter(|e| e.id() == old) {
            entry.access = new.clone();
            replaced = true;
        }
        replaced
    }

    fn apply(&mut self, op: &TreeOp, now: Timestamp, mode: Mode) -> FSResult<()> {
        match op {
            TreeOp::Insert { path, entry } => {
                self.insert(path, entry.clone(), now, mode)?;
            }
            TreeOp::Move { src, dst } => {
                self.move_entry(src, dst, now, mode)?;
            }
            TreeOp::Delete { path, file } => {
                self.delete(path, now, file.as_ref())?;
            }
            TreeOp::Undelete { id } => {
                self.undelete(id, now, mode)?;
            }
            TreeOp::Purge { id } => {
                self.purge(id)?;
            }
            TreeOp::AddGroup { name, access } => self.add_group(name, access.clone(), mode)?,
            TreeOp::ReplaceAccess { old, new } => {
                if !self.replace_access(old, new) {
                    return Err(PathError::NotFound(format!("file {old}")).into());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum WorkspaceKind {
    User,
    Group { name: String, access: VlobAccess },
}

/// A tree plus the vlob it is persisted in.
#[derive(Debug)]
pub struct Workspace {
    kind: WorkspaceKind,
    tree: Tree,
    /// Committed version the tree is based on. 0 for a never saved user.
    version: u64,
    pending: Vec<TreeOp>,
}

impl Workspace {
    pub async fn load_user(ctx: &FsContext) -> FSResult<Self> {
        let kind = WorkspaceKind::User;
        let (tree, version) = fetch(ctx, &kind).await?;
        debug!(user = %ctx.identity.user_id(), version, "user workspace loaded");
        Ok(Self {
            kind,
            tree,
            version,
            pending: Vec::new(),
        })
    }

    pub async fn load_group(ctx: &FsContext, name: &str, access: &VlobAccess) -> FSResult<Self> {
        let kind = WorkspaceKind::Group {
            name: name.to_string(),
            access: access.clone(),
        };
        let (tree, version) = fetch(ctx, &kind).await?;
        Ok(Self {
            kind,
            tree,
            version,
            pending: Vec::new(),
        })
    }

    /// Creates the vlob of a new, empty group.
    pub async fn create_group(ctx: &FsContext, name: &str) -> FSResult<Self> {
        let key = parsec_core::SecretKey::generate();
        let manifest = GroupManifest::new(ctx.now());
        let blob = seal_manifest(ctx, &manifest, &key)?;
        let created = ctx.vlobs.vlob_create(None, blob).await?;
        debug!(group = name, vlob = %created.id, "group created");
        Ok(Self {
            kind: WorkspaceKind::Group {
                name: name.to_string(),
                access: VlobAccess::new(
                    created.id,
                    created.read_trust_seed,
                    created.write_trust_seed,
                    &key,
                ),
            },
            tree: Tree {
                root: manifest.root,
                dustbin: manifest.dustbin,
                groups: BTreeMap::new(),
            },
            version: 1,
            pending: Vec::new(),
        })
    }

    pub fn kind(&self) -> &WorkspaceKind {
        &self.kind
    }

    /// The vlob holding a group tree. `None` for the user workspace.
    pub fn group_access(&self) -> Option<&VlobAccess> {
        match &self.kind {
            WorkspaceKind::User => None,
            WorkspaceKind::Group { access, .. } => Some(access),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    fn record(&mut self, ctx: &FsContext, op: TreeOp) -> FSResult<()> {
        self.tree.apply(&op, ctx.now(), Mode::Strict)?;
        self.pending.push(op);
        Ok(())
    }

    pub fn insert(&mut self, ctx: &FsContext, path: &FsPath, entry: Entry) -> FSResult<()> {
        self.record(
            ctx,
            TreeOp::Insert {
                path: path.clone(),
                entry,
            },
        )
    }

    pub fn create_folder(&mut self, ctx: &FsContext, path: &FsPath) -> FSResult<()> {
        self.insert(ctx, path, Entry::Folder(FolderEntry::new(ctx.now())))
    }

    pub fn move_entry(&mut self, ctx: &FsContext, src: &FsPath, dst: &FsPath) -> FSResult<()> {
        self.record(
            ctx,
            TreeOp::Move {
                src: src.clone(),
                dst: dst.clone(),
            },
        )
    }

    /// Moves `path` (and every file below it) to the dustbin.
    pub fn delete(&mut self, ctx: &FsContext, path: &FsPath) -> FSResult<Vec<DustbinEntry>> {
        let file = match self.tree.lookup(path)? {
            EntryRef::File(access) => Some(access.id.clone()),
            EntryRef::Folder(_) => None,
        };
        let now = ctx.now();
        let removed = self.tree.delete(path, now, file.as_ref())?;
        self.pending.push(TreeOp::Delete {
            path: path.clone(),
            file,
        });
        Ok(removed)
    }

    /// Puts a dustbin entry back at its original path.
    pub fn undelete(&mut self, ctx: &FsContext, id: &VlobId) -> FSResult<FsPath> {
        let path = self.tree.undelete(id, ctx.now(), Mode::Strict)?;
        self.pending.push(TreeOp::Undelete { id: id.clone() });
        Ok(path)
    }

    /// Removes an entry from the dustbin for good. The caller deletes its data.
    pub fn purge(&mut self, id: &VlobId) -> FSResult<DustbinEntry> {
        let entry = self.tree.purge(id)?;
        self.pending.push(TreeOp::Purge { id: id.clone() });
        Ok(entry)
    }

    pub fn add_group(&mut self, ctx: &FsContext, name: &str, access: VlobAccess) -> FSResult<()> {
        if !matches!(self.kind, WorkspaceKind::User) {
            return Err(FsError::BadParams("groups cannot contain groups".into()));
        }
        self.record(
            ctx,
            TreeOp::AddGroup {
                name: name.to_string(),
                access,
            },
        )
    }

    pub fn replace_access(&mut self, ctx: &FsContext, old: &VlobId, new: VlobAccess) -> FSResult<()> {
        self.record(
            ctx,
            TreeOp::ReplaceAccess {
                old: old.clone(),
                new,
            },
        )
    }

    /// Pushes pending tree operations as the next version.
    pub async fn save(&mut self, ctx: &FsContext) -> FSResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let mut attempt = 0;
        loop {
            let target = self.version + 1;
            match push(ctx, &self.kind, &self.tree, target).await {
                Ok(()) => break,
                Err(FsError::Vlob(VlobError::BadVersion { current }))
                    if attempt < ctx.config.max_update_retries =>
                {
                    attempt += 1;
                    warn!(
                        expected = target,
                        current, attempt, "workspace changed remotely, replaying local changes"
                    );
                    let (remote, version) = fetch(ctx, &self.kind).await?;
                    self.tree = remote;
                    self.version = version;
                    let now = ctx.now();
                    for op in &self.pending {
                        if let Err(err) = self.tree.apply(op, now, Mode::Replay) {
                            warn!("dropping local change that no longer applies: {err}");
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }
        self.version += 1;
        self.pending.clear();
        debug!(version = self.version, "workspace saved");
        Ok(())
    }

    /// Replaces the tree with the latest remote one. A workspace with
    /// unsaved changes is left alone; returns whether it was reloaded.
    pub async fn reload(&mut self, ctx: &FsContext) -> FSResult<bool> {
        if self.is_dirty() {
            return Ok(false);
        }
        let (tree, version) = fetch(ctx, &self.kind).await?;
        if version == self.version {
            return Ok(false);
        }
        self.tree = tree;
        self.version = version;
        Ok(true)
    }
}

async fn fetch(ctx: &FsContext, kind: &WorkspaceKind) -> FSResult<(Tree, u64)> {
    match kind {
        WorkspaceKind::User => {
            let blob = ctx.vlobs.user_vlob_read(None).await?;
            if blob.version == 0 {
                return Ok((Tree::new(ctx.now()), 0));
            }
            let manifest = open_user_manifest(ctx, &blob.blob)?;
            Ok((
                Tree {
                    root: manifest.root,
                    dustbin: manifest.dustbin,
                    groups: manifest.groups,
                },
                blob.version,
            ))
        }
        WorkspaceKind::Group { access, .. } => {
            let blob = ctx
                .vlobs
                .vlob_read(&access.id, &access.read_trust_seed, None)
                .await?;
            let (manifest, _author) =
                open_manifest::<GroupManifest>(ctx, &blob.blob, &access.key())?;
            Ok((
                Tree {
                    root: manifest.root,
                    dustbin: manifest.dustbin,
                    groups: BTreeMap::new(),
                },
                blob.version,
            ))
        }
    }
}

async fn push(ctx: &FsContext, kind: &WorkspaceKind, tree: &Tree, version: u64) -> FSResult<()> {
    match kind {
        WorkspaceKind::User => {
            let mut manifest = UserManifest::new(tree.root.created);
            manifest.root = tree.root.clone();
            manifest.dustbin = tree.dustbin.clone();
            manifest.groups = tree.groups.clone();
            let blob = seal_user_manifest(ctx, &manifest)?;
            ctx.vlobs.user_vlob_update(version, blob).await.map_err(Into::into)
        }
        WorkspaceKind::Group { access, .. } => {
            let mut manifest = GroupManifest::new(tree.root.created);
            manifest.root = tree.root.clone();
            manifest.dustbin = tree.dustbin.clone();
            let blob = seal_manifest(ctx, &manifest, &access.key())?;
            ctx.vlobs
                .vlob_update(&access.id, &access.write_trust_seed, version, blob)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::FsConfig,
        context::{LocalIdentity, tests::test_context},
    };
    use parsec_backend::MemoryBackend;
    use parsec_core::{SecretKey, TrustSeed, UserId};
    use std::sync::Arc;

    fn p(path: &str) -> FsPath {
        FsPath::parse(path).unwrap()
    }

    fn file(id: &str) -> Entry {
        Entry::File(VlobAccess::new(
            VlobId::new(id),
            TrustSeed::generate(),
            TrustSeed::generate(),
            &SecretKey::generate(),
        ))
    }

    fn names(tree: &Tree, path: &str) -> Vec<String> {
        tree.folder(&p(path)).unwrap().children.keys().cloned().collect()
    }

    #[tokio::test]
    async fn insert_and_resolve() {
        let (ctx, _backend) = test_context("alice");
        let mut ws = Workspace::load_user(&ctx).await.unwrap();
        assert_eq!(ws.version(), 0);

        ws.create_folder(&ctx, &p("/docs")).unwrap();
        ws.insert(&ctx, &p("/docs/a"), file("a")).unwrap();

        assert!(matches!(ws.tree().lookup(&p("/docs/a")), Ok(EntryRef::File(_))));
        assert!(matches!(
            ws.insert(&ctx, &p("/docs/a"), file("b")),
            Err(FsError::Path(PathError::AlreadyExists(_)))
        ));
        assert!(matches!(
            ws.insert(&ctx, &p("/missing/a"), file("c")),
            Err(FsError::Path(PathError::NotFound(_)))
        ));
        assert!(matches!(
            ws.insert(&ctx, &p("/docs/a/b"), file("d")),
            Err(FsError::Path(PathError::NotAFolder(_)))
        ));
        assert!(matches!(
            ws.tree().file(&p("/docs")),
            Err(PathError::NotAFile(_))
        ));
    }

    #[tokio::test]
    async fn move_keeps_the_entry() {
        let (ctx, _backend) = test_context("alice");
        let mut ws = Workspace::load_user(&ctx).await.unwrap();
        ws.create_folder(&ctx, &p("/a")).unwrap();
        ws.insert(&ctx, &p("/a/f"), file("f")).unwrap();
        let created = ws.tree().folder(&p("/a")).unwrap().created;

        ws.move_entry(&ctx, &p("/a"), &p("/b")).unwrap();
        assert_eq!(names(ws.tree(), "/"), vec!["b"]);
        assert_eq!(ws.tree().folder(&p("/b")).unwrap().created, created);
        assert_eq!(ws.tree().file(&p("/b/f")).unwrap().id, VlobId::new("f"));

        assert!(matches!(
            ws.move_entry(&ctx, &p("/b"), &p("/b/inner")),
            Err(FsError::Path(PathError::Invalid(_)))
        ));
        ws.insert(&ctx, &p("/c"), file("c")).unwrap();
        assert!(matches!(
            ws.move_entry(&ctx, &p("/c"), &p("/b/f")),
            Err(FsError::Path(PathError::AlreadyExists(_)))
        ));
        // A failed move leaves both entries in place.
        assert_eq!(names(ws.tree(), "/"), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn folder_delete_and_undelete() {
        let (ctx, _backend) = test_context("alice");
        let mut ws = Workspace::load_user(&ctx).await.unwrap();
        ws.create_folder(&ctx, &p("/a")).unwrap();
        ws.create_folder(&ctx, &p("/a/b")).unwrap();
        ws.insert(&ctx, &p("/a/b/f"), file("f")).unwrap();
        ws.insert(&ctx, &p("/a/g"), file("g")).unwrap();

        let removed = ws.delete(&ctx, &p("/a")).unwrap();
        let mut paths: Vec<&str> = removed.iter().map(|e| e.path.as_str()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/a/b/f", "/a/g"]);
        assert!(names(ws.tree(), "/").is_empty());

        let restored = ws.undelete(&ctx, &VlobId::new("f")).unwrap();
        assert_eq!(restored.to_string(), "/a/b/f");
        assert_eq!(ws.tree().dustbin.len(), 1);

        ws.insert(&ctx, &p("/a/g"), file("other")).unwrap();
        assert!(matches!(
            ws.undelete(&ctx, &VlobId::new("g")),
            Err(FsError::Path(PathError::AlreadyExists(_)))
        ));
        let purged = ws.purge(&VlobId::new("g")).unwrap();
        assert_eq!(purged.path, "/a/g");
        assert!(ws.tree().dustbin.is_empty());
        assert!(ws.purge(&VlobId::new("g")).is_err());
    }

    #[tokio::test]
    async fn save_and_reload() {
        let (ctx, _backend) = test_context("alice");
        let mut ws = Workspace::load_user(&ctx).await.unwrap();
        ws.create_folder(&ctx, &p("/docs")).unwrap();
        ws.save(&ctx).await.unwrap();
        assert_eq!(ws.version(), 1);
        assert!(!ws.is_dirty());

        let loaded = Workspace::load_user(&ctx).await.unwrap();
        assert_eq!(loaded.tree(), ws.tree());
        assert_eq!(loaded.version(), 1);
    }

    #[tokio::test]
    async fn conflicting_saves_are_replayed() {
        let backend = MemoryBackend::new();
        let identity = LocalIdentity::generate(UserId::new("alice"));
        let device = || {
            let session = Arc::new(backend.session(UserId::new("alice")));
            FsContext::new(identity.clone(), session.clone(), session, FsConfig::default())
        };
        let (one, two) = (device(), device());

        let mut first = Workspace::load_user(&one).await.unwrap();
        let mut second = Workspace::load_user(&two).await.unwrap();

        first.insert(&one, &p("/report"), file("r1")).unwrap();
        first.insert(&one, &p("/notes"), file("n1")).unwrap();
        first.save(&one).await.unwrap();

        second.insert(&two, &p("/report"), file("r2")).unwrap();
        second.save(&two).await.unwrap();
        assert_eq!(second.version(), 2);

        assert_eq!(
            names(second.tree(), "/"),
            vec!["notes", "report", "report.conflict"]
        );
        assert_eq!(
            second.tree().file(&p("/report.conflict")).unwrap().id,
            VlobId::new("r2")
        );

        assert!(first.reload(&one).await.unwrap());
        assert_eq!(first.tree(), second.tree());
    }

    #[tokio::test]
    async fn group_tree_lives_in_its_own_vlob() {
        let (ctx, backend) = test_context("alice");
        let mut group = Workspace::create_group(&ctx, "team").await.unwrap();
        let access = group.group_access().unwrap().clone();
        group.create_folder(&ctx, &p("/shared")).unwrap();
        group.save(&ctx).await.unwrap();
        assert_eq!(backend.vlob_version(&access.id), Some(2));

        let mut user = Workspace::load_user(&ctx).await.unwrap();
        user.add_group(&ctx, "team", access.clone()).unwrap();
        assert!(user.add_group(&ctx, "team", access.clone()).is_err());
        assert!(group.add_group(&ctx, "nested", access.clone()).is_err());

        let reloaded = Workspace::load_group(&ctx, "team", &access).await.unwrap();
        assert_eq!(names(reloaded.tree(), "/"), vec!["shared"]);
    }
}
