//! Background synchronizer.
//!
//! Local mutations are recorded in a [`Journal`] keyed by path. An entry is
//! committed once it has been quiet for `min_wait`, or once it has been
//! pending for `max_wait` under continuous edits. The task also listens to
//! backend events and tells the core when remote state changed.

use parsec_core::{EventBus, UserId};
use std::{collections::HashMap, time::Duration};
use tokio::{
    sync::{broadcast::error::RecvError, mpsc},
    time::{Instant, sleep_until},
};
use tracing::{debug, warn};

use crate::{actor::WeakCoreHandle, config::FsConfig, path::FsPath};

/// A path inside the user tree (`group == None`) or a group tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JournalKey {
    pub group: Option<String>,
    pub path: FsPath,
}

impl JournalKey {
    pub fn new(group: Option<String>, path: FsPath) -> Self {
        Self { group, path }
    }

    /// `true` if `self` is `other` or lies below it in the same tree.
    pub fn is_within(&self, other: &JournalKey) -> bool {
        self.group == other.group && self.path.starts_with(&other.path)
    }
}

#[derive(Debug, Clone, Copy)]
struct LocalChange {
    first: Instant,
    last: Instant,
    retry_at: Option<Instant>,
}

/// Pending local changes and when each becomes eligible for commit.
#[derive(Debug)]
pub struct Journal {
    entries: HashMap<JournalKey, LocalChange>,
    min_wait: Duration,
    max_wait: Duration,
}

impl Journal {
    pub fn new(min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            min_wait,
            max_wait,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record(&mut self, key: JournalKey, now: Instant) {
        self.entries
            .entry(key)
            .and_modify(|change| change.last = now)
            .or_insert(LocalChange {
                first: now,
                last: now,
                retry_at: None,
            });
    }

    fn due(&self, change: &LocalChange) -> Instant {
        let due = (change.last + self.min_wait).min(change.first + self.max_wait);
        change.retry_at.map_or(due, |retry| retry.max(due))
    }

    /// The entry that becomes eligible first.
    pub fn next_due(&self) -> Option<(JournalKey, Instant)> {
        self.entries
            .iter()
            .map(|(key, change)| (key, self.due(change)))
            .min_by_key(|(_, due)| *due)
            .map(|(key, due)| (key.clone(), due))
    }

    /// Forgets `key` and everything below it that was last modified no
    /// later than `start`.
    pub fn clear_committed(&mut self, key: &JournalKey, start: Instant) {
        self.entries
            .retain(|candidate, change| !(candidate.is_within(key) && change.last <= start));
    }

    pub fn remove(&mut self, key: &JournalKey) {
        self.entries.remove(key);
    }

    /// Keeps `key` but does not retry it before `until`.
    pub fn postpone(&mut self, key: &JournalKey, until: Instant) {
        if let Some(change) = self.entries.get_mut(key) {
            change.retry_at = Some(until);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug)]
pub(crate) enum SyncMessage {
    Changed(JournalKey),
    /// Everything was committed out of band.
    Clear,
}

pub(crate) struct Synchronizer {
    journal: Journal,
    core: WeakCoreHandle,
    receiver: mpsc::UnboundedReceiver<SyncMessage>,
    events: EventBus,
    user: UserId,
    retry_wait: Duration,
    offline_wait: Duration,
}

impl Synchronizer {
    /// Starts the task. It stops once the returned sender is dropped.
    pub(crate) fn spawn(
        core: WeakCoreHandle,
        events: EventBus,
        user: UserId,
        config: &FsConfig,
    ) -> mpsc::UnboundedSender<SyncMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = Self {
            journal: Journal::new(config.min_wait(), config.max_wait()),
            core,
            receiver,
            events,
            user,
            retry_wait: config.min_wait(),
            offline_wait: config.backend_offline_wait(),
        };
        tokio::spawn(task.run());
        sender
    }

    async fn run(mut self) {
        let mut vlob_events = self.events.on_vlob_updated();
        let mut user_events = self.events.on_user_vlob_updated();
        let mut events_open = true;

        loop {
            let next = self.journal.next_due();
            let deadline = next.as_ref().map(|(_, due)| *due);
            tokio::select! {
                message = self.receiver.recv() => match message {
                    Some(SyncMessage::Changed(key)) => self.journal.record(key, Instant::now()),
                    Some(SyncMessage::Clear) => self.journal.clear(),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some((key, _)) = next
                        && !self.commit(key).await
                    {
                        break;
                    }
                }
                event = vlob_events.recv(), if events_open => {
                    let Some(core) = self.core.upgrade() else { break };
                    match event {
                        Ok(event) => core.remote_vlob_changed(event.id).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "missed vlob events, dropping cached files");
                            core.remote_resync().await;
                        }
                        Err(RecvError::Closed) => events_open = false,
                    }
                }
                event = user_events.recv(), if events_open => {
                    let Some(core) = self.core.upgrade() else { break };
                    match event {
                        Ok(event) if event.user == self.user => core.remote_user_changed().await,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => core.remote_user_changed().await,
                        Err(RecvError::Closed) => events_open = false,
                    }
                }
            }
        }
        debug!("synchronizer stopped");
    }

    /// Commits one journal entry. Returns `false` once the core is gone.
    async fn commit(&mut self, key: JournalKey) -> bool {
        let Some(core) = self.core.upgrade() else {
            return false;
        };
        let start = Instant::now();
        match core.commit_path(key.clone()).await {
            Ok(()) => {
                debug!(path = %key.path, group = ?key.group, "synchronized");
                self.journal.clear_committed(&key, start);
            }
            Err(err) if err.is_offline() => {
                warn!(path = %key.path, "backend offline, retrying in {:?}", self.offline_wait);
                self.journal.postpone(&key, Instant::now() + self.offline_wait);
            }
            Err(err) if err.is_path_not_found() => {
                debug!(path = %key.path, "synchronized path is gone");
                self.journal.remove(&key);
            }
            Err(err) => {
                warn!(path = %key.path, "synchronization failed, retrying later: {err}");
                self.journal.postpone(&key, Instant::now() + self.retry_wait);
            }
        }
        true
    }
}
