//! The grocery list itself: an ordered collection of items mirrored into one
//! storage key after every mutation.

use thiserror::Error;
use time::OffsetDateTime;
use unicode_segmentation::UnicodeSegmentation;

use crate::storage::{Backend, StorageError};

mod confirm;
pub mod record;
mod reorder;

pub use confirm::Confirmation;
pub use reorder::reorder;

pub type ItemId = i64;

pub const MAX_TEXT_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    pub text: String,
    /// Creation time, or the time of the last edit.
    pub date: OffsetDateTime,
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListError {
    #[error("item text cannot be empty")]
    EmptyText,
    #[error("item text is {len} characters, the limit is {max}")]
    TextTooLong { len: usize, max: usize },
    #[error("item #{0} not found")]
    NotFound(ItemId),
    #[error("position {index} is out of range for {len} items")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWrite {
    Save,
    Remove,
}

/// Whether the backend holds what memory holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Synced,
    Diverged {
        pending: PendingWrite,
        message: String,
        since: OffsetDateTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSummary {
    pub count: usize,
}

impl ListSummary {
    pub fn message(&self) -> String {
        match self.count {
            0 => "nothing to buy".to_string(),
            1 => "there is 1 item to buy".to_string(),
            count => format!("there are {count} items to buy"),
        }
    }
}

pub struct ListStore<B: Backend> {
    backend: B,
    key: String,
    /// Insertion order; the display order is the reverse.
    items: Vec<Item>,
    last_id: ItemId,
    sync: SyncState,
}

impl<B: Backend> ListStore<B> {
    /// Reads the list stored under `key`. Never fails: unreadable storage or
    /// a corrupt payload yields an empty list and a log entry.
    pub fn load(backend: B, key: impl Into<String>) -> Self {
        let key = key.into();
        let now = OffsetDateTime::now_utc();
        let items = match backend.get(&key) {
            Ok(Some(raw)) => match record::decode(&raw, now) {
                Ok(decoded) => {
                    if decoded.skipped > 0 || decoded.repaired_dates > 0 {
                        tracing::warn!(
                            key = %key,
                            skipped = decoded.skipped,
                            repaired_dates = decoded.repaired_dates,
                            "recovered from malformed stored items"
                        );
                    }
                    decoded.items
                }
                Err(err) => {
                    tracing::warn!(key = %key, %err, "stored list is corrupt, starting empty");
                    let backup_key = format!("{key}.corrupt");
                    if let Err(err) = backend.set(&backup_key, &raw) {
                        tracing::warn!(key = %backup_key, %err, "could not keep corrupt list copy");
                    }
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                tracing::error!(key = %key, %err, "failed to read stored list, starting empty");
                Vec::new()
            }
        };
        let last_id = items.iter().map(|item| item.id).max().unwrap_or(0);
        tracing::debug!(key = %key, count = items.len(), "list loaded");
        Self {
            backend,
            key,
            items,
            last_id,
            sync: SyncState::Synced,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in insertion order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Items newest first, the order they are shown in.
    pub fn display(&self) -> impl Iterator<Item = &Item> + '_ {
        self.items.iter().rev()
    }

    pub fn display_item(&self, index: usize) -> Option<&Item> {
        self.display().nth(index)
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn summary(&self) -> ListSummary {
        ListSummary {
            count: self.items.len(),
        }
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    /// Appends a new item. Blank text is ignored and yields `Ok(None)`.
    pub fn add(&mut self, text: &str) -> Result<Option<ItemId>, ListError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        check_length(text)?;
        let now = record::truncate_to_millis(OffsetDateTime::now_utc());
        let id = self.next_id(now);
        self.items.push(Item {
            id,
            text: text.to_string(),
            date: now,
            edited: false,
        });
        tracing::debug!(id, "item added");
        self.persist(PendingWrite::Save);
        Ok(Some(id))
    }

    /// Looks up the item an edit draft should start from.
    pub fn start_edit(&self, id: ItemId) -> Result<&Item, ListError> {
        self.get(id).ok_or(ListError::NotFound(id))
    }

    pub fn commit_edit(&mut self, id: ItemId, text: &str) -> Result<(), ListError> {
        if text.trim().is_empty() {
            return Err(ListError::EmptyText);
        }
        check_length(text)?;
        let item = self
            .items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(ListError::NotFound(id))?;
        item.text = text.to_string();
        item.edited = true;
        item.date = record::truncate_to_millis(OffsetDateTime::now_utc());
        tracing::debug!(id, "item edited");
        self.persist(PendingWrite::Save);
        Ok(())
    }

    /// Returns `false` without touching storage when `id` is unknown.
    pub fn delete(&mut self, id: ItemId) -> bool {
        let Some(position) = self.items.iter().position(|item| item.id == id) else {
            return false;
        };
        self.items.remove(position);
        tracing::debug!(id, "item deleted");
        self.persist(PendingWrite::Save);
        true
    }

    /// Moves the item shown at display index `from` to display index `to`.
    /// Returns whether anything moved.
    pub fn reorder(&mut self, from: usize, to: usize) -> Result<bool, ListError> {
        let len = self.items.len();
        for index in [from, to] {
            if index >= len {
                return Err(ListError::IndexOutOfRange { index, len });
            }
        }
        if from == to {
            return Ok(false);
        }
        let display = self.items.drain(..).rev().collect::<Vec<_>>();
        let mut moved = reorder(display, from, to);
        moved.reverse();
        self.items = moved;
        tracing::debug!(from, to, "items reordered");
        self.persist(PendingWrite::Save);
        Ok(true)
    }

    /// Empties the list and drops the storage key altogether.
    pub fn clear_all(&mut self) {
        self.items.clear();
        tracing::debug!(key = %self.key, "list cleared");
        self.persist(PendingWrite::Remove);
    }

    /// Re-issues the write that last failed. Returns `true` once storage and
    /// memory agree again.
    pub fn retry_sync(&mut self) -> bool {
        let pending = match &self.sync {
            SyncState::Synced => return true,
            SyncState::Diverged { pending, .. } => *pending,
        };
        match self.write(pending) {
            Ok(()) => {
                tracing::info!(key = %self.key, "storage caught up with pending changes");
                self.sync = SyncState::Synced;
                true
            }
            Err(err) => {
                tracing::debug!(key = %self.key, %err, "storage still rejecting writes");
                false
            }
        }
    }

    fn next_id(&mut self, now: OffsetDateTime) -> ItemId {
        let millis = (now.unix_timestamp_nanos() / 1_000_000) as ItemId;
        let id = millis.max(self.last_id + 1);
        self.last_id = id;
        id
    }

    /// Writes the full snapshot, retrying once. A second failure leaves the
    /// mutation in memory and marks the store diverged.
    fn persist(&mut self, kind: PendingWrite) {
        let first = match self.write(kind) {
            Ok(()) => {
                self.sync = SyncState::Synced;
                return;
            }
            Err(err) => err,
        };
        tracing::warn!(key = %self.key, err = %first, "storage write failed, retrying once");
        match self.write(kind) {
            Ok(()) => self.sync = SyncState::Synced,
            Err(err) => {
                tracing::error!(key = %self.key, %err, "storage write failed twice, keeping changes in memory");
                let since = match &self.sync {
                    SyncState::Diverged { since, .. } => *since,
                    SyncState::Synced => OffsetDateTime::now_utc(),
                };
                self.sync = SyncState::Diverged {
                    pending: kind,
                    message: err.to_string(),
                    since,
                };
            }
        }
    }

    fn write(&self, kind: PendingWrite) -> Result<(), StorageError> {
        match kind {
            PendingWrite::Save => {
                let raw = record::encode(&self.items)?;
                self.backend.set(&self.key, &raw)
            }
            PendingWrite::Remove => self.backend.remove(&self.key),
        }
    }
}

fn check_length(text: &str) -> Result<(), ListError> {
    let len = text.graphemes(true).count();
    if len > MAX_TEXT_LEN {
        return Err(ListError::TextTooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigPaths, StorageOptions};
    use crate::storage::{self, MemoryBackend};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const KEY: &str = "localItems";

    fn store() -> ListStore<MemoryBackend> {
        ListStore::load(MemoryBackend::new(), KEY)
    }

    fn texts<B: Backend>(store: &ListStore<B>) -> Vec<String> {
        store.display().map(|item| item.text.clone()).collect()
    }

    fn reload(store: &ListStore<MemoryBackend>) -> ListStore<MemoryBackend> {
        ListStore::load(store.backend().clone(), KEY)
    }

    #[test]
    fn add_appends_exact_text_and_persists() -> anyhow::Result<()> {
        let mut store = store();
        let id = store.add("  oat milk ")?.expect("added");
        assert_eq!(store.len(), 1);
        let item = store.get(id).expect("present");
        assert_eq!(item.text, "  oat milk ");
        assert!(!item.edited);
        assert_eq!(reload(&store).items(), store.items());
        Ok(())
    }

    #[test]
    fn blank_add_is_a_no_op() -> anyhow::Result<()> {
        let mut store = store();
        assert_eq!(store.add("")?, None);
        assert_eq!(store.add("   ")?, None);
        assert!(store.is_empty());
        assert!(!store.backend().contains_key(KEY));
        Ok(())
    }

    #[test]
    fn over_long_text_is_rejected() {
        let mut store = store();
        let err = store.add(&"x".repeat(MAX_TEXT_LEN + 1)).unwrap_err();
        assert_matches!(err, ListError::TextTooLong { len: 101, max: 100 });
        assert!(store.add(&"x".repeat(MAX_TEXT_LEN)).is_ok());
    }

    #[test]
    fn ids_stay_unique_under_rapid_adds() -> anyhow::Result<()> {
        let mut store = store();
        let mut ids = Vec::new();
        for n in 0..50 {
            ids.push(store.add(&format!("item {n}"))?.expect("added"));
        }
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, ids);
        Ok(())
    }

    #[test]
    fn display_order_is_newest_first() -> anyhow::Result<()> {
        let mut store = store();
        store.add("milk")?;
        store.add("eggs")?;
        store.add("bread")?;
        assert_eq!(texts(&store), vec!["bread", "eggs", "milk"]);
        assert_eq!(store.display_item(0).map(|item| item.text.as_str()), Some("bread"));
        Ok(())
    }

    #[test]
    fn commit_edit_replaces_text_and_marks_edited() -> anyhow::Result<()> {
        let mut store = store();
        let id = store.add("milk")?.expect("added");
        let before = store.get(id).expect("present").date;
        assert_eq!(store.start_edit(id)?.text, "milk");
        store.commit_edit(id, "oat milk")?;
        let item = store.get(id).expect("present");
        assert_eq!(item.text, "oat milk");
        assert!(item.edited);
        assert!(item.date >= before);
        let reloaded = reload(&store);
        assert!(reloaded.get(id).expect("persisted").edited);
        Ok(())
    }

    #[test]
    fn blank_edit_is_rejected_and_nothing_changes() -> anyhow::Result<()> {
        let mut store = store();
        let id = store.add("milk")?.expect("added");
        assert_eq!(store.commit_edit(id, "  "), Err(ListError::EmptyText));
        assert_eq!(store.get(id).expect("present").text, "milk");
        assert_eq!(store.commit_edit(id + 1, "x"), Err(ListError::NotFound(id + 1)));
        assert_matches!(store.start_edit(id + 1), Err(ListError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn delete_removes_and_missing_id_is_a_no_op() -> anyhow::Result<()> {
        let mut store = store();
        let milk = store.add("milk")?.expect("added");
        store.add("eggs")?;
        assert!(store.delete(milk));
        assert!(store.get(milk).is_none());
        assert!(!store.delete(milk));
        assert_eq!(texts(&reload(&store)), vec!["eggs"]);
        Ok(())
    }

    #[test]
    fn reorder_round_trips_and_survives_reload() -> anyhow::Result<()> {
        let mut store = store();
        for text in ["a", "b", "c", "d"] {
            store.add(text)?;
        }
        let original = texts(&store);
        assert_eq!(original, vec!["d", "c", "b", "a"]);

        assert!(store.reorder(0, 2)?);
        assert_eq!(texts(&store), vec!["c", "b", "d", "a"]);
        assert_eq!(texts(&reload(&store)), vec!["c", "b", "d", "a"]);

        assert!(store.reorder(2, 0)?);
        assert_eq!(texts(&store), original);
        Ok(())
    }

    #[test]
    fn noop_reorder_does_not_write() -> anyhow::Result<()> {
        let mut store = store();
        store.add("a")?;
        store.add("b")?;
        store.backend().fail_next_writes(2);
        assert!(!store.reorder(1, 1)?);
        assert_eq!(store.sync_state(), &SyncState::Synced);
        assert_eq!(
            store.reorder(0, 5),
            Err(ListError::IndexOutOfRange { index: 5, len: 2 })
        );
        Ok(())
    }

    #[test]
    fn clear_all_removes_the_key() -> anyhow::Result<()> {
        let mut store = store();
        store.add("milk")?;
        store.clear_all();
        assert!(store.is_empty());
        assert!(!store.backend().contains_key(KEY));
        assert!(reload(&store).is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_payload_loads_empty_and_is_kept_aside() -> anyhow::Result<()> {
        let backend = MemoryBackend::new();
        backend.set(KEY, "{not json")?;
        let store = ListStore::load(backend.clone(), KEY);
        assert!(store.is_empty());
        assert_eq!(backend.get("localItems.corrupt")?.as_deref(), Some("{not json"));
        Ok(())
    }

    #[test]
    fn single_write_failure_is_retried() -> anyhow::Result<()> {
        let mut store = store();
        store.backend().fail_next_writes(1);
        store.add("milk")?;
        assert_eq!(store.sync_state(), &SyncState::Synced);
        assert_eq!(reload(&store).len(), 1);
        Ok(())
    }

    #[test]
    fn persistent_failure_diverges_then_heals() -> anyhow::Result<()> {
        let mut store = store();
        store.backend().fail_next_writes(3);
        store.add("milk")?;
        assert_matches!(
            store.sync_state(),
            SyncState::Diverged { pending: PendingWrite::Save, .. }
        );
        assert_eq!(store.len(), 1);
        assert!(reload(&store).is_empty());

        assert!(!store.retry_sync());
        assert!(store.retry_sync());
        assert_eq!(store.sync_state(), &SyncState::Synced);
        assert_eq!(reload(&store).len(), 1);
        Ok(())
    }

    #[test]
    fn failed_clear_retries_the_removal() -> anyhow::Result<()> {
        let mut store = store();
        store.add("milk")?;
        store.backend().fail_next_writes(2);
        store.clear_all();
        assert_matches!(
            store.sync_state(),
            SyncState::Diverged { pending: PendingWrite::Remove, .. }
        );
        assert!(store.backend().contains_key(KEY));
        assert!(store.retry_sync());
        assert!(!store.backend().contains_key(KEY));
        Ok(())
    }

    #[test]
    fn quota_exceeded_is_reported_as_divergence() -> anyhow::Result<()> {
        let mut store = ListStore::load(MemoryBackend::with_quota(120), KEY);
        store.add("milk")?;
        assert_eq!(store.sync_state(), &SyncState::Synced);
        store.add(&"y".repeat(90))?;
        let SyncState::Diverged { message, .. } = store.sync_state() else {
            panic!("expected divergence");
        };
        assert!(message.contains("quota"));
        assert_eq!(store.len(), 2);
        Ok(())
    }

    #[test]
    fn summary_pluralizes() -> anyhow::Result<()> {
        let mut store = store();
        assert_eq!(store.summary().message(), "nothing to buy");
        store.add("milk")?;
        assert_eq!(store.summary().message(), "there is 1 item to buy");
        store.add("eggs")?;
        assert_eq!(store.summary().message(), "there are 2 items to buy");
        Ok(())
    }

    #[test]
    fn sqlite_backed_list_survives_restart() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let options = StorageOptions::default();
        let mut first = ListStore::load(storage::init(&paths, &options)?, KEY);
        let id = first.add("coffee")?.expect("added");
        first.add("filters")?;
        first.commit_edit(id, "decaf coffee")?;

        let second = ListStore::load(storage::init(&paths, &options)?, KEY);
        assert_eq!(second.items(), first.items());
        Ok(())
    }
}
