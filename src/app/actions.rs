use crate::list::{Confirmation, ItemId, ListError, ListStore};
use crate::storage::Backend;

/// Everything the presentation layer can ask of the list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Add(String),
    EditRequest(ItemId),
    EditCommit(String),
    EditCancel,
    DeleteRequest(ItemId),
    DeleteConfirm,
    DeleteCancel,
    Reorder { from: usize, to: usize },
    ClearRequest,
    ClearConfirm,
    ClearCancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Added(ItemId),
    /// Blank input; nothing happened.
    Ignored,
    Editing { id: ItemId, draft: String },
    Edited(ItemId),
    EditCanceled,
    DeletePending(ItemId),
    Deleted(ItemId),
    DeleteCanceled,
    Moved { from: usize, to: usize },
    Unmoved,
    ClearPending { count: usize },
    Cleared { count: usize },
    ClearCanceled,
    /// Confirm or commit arrived with nothing pending.
    NothingPending,
}

/// Routes intents to the store and owns the transient interaction state:
/// the item being edited and the two confirmation gates.
#[derive(Debug, Default)]
pub struct ActionDispatcher {
    editing: Option<ItemId>,
    delete: Confirmation<ItemId>,
    clear: Confirmation<()>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn editing(&self) -> Option<ItemId> {
        self.editing
    }

    pub fn pending_delete(&self) -> Option<ItemId> {
        self.delete.pending().copied()
    }

    pub fn clear_pending(&self) -> bool {
        self.clear.is_pending()
    }

    pub fn dispatch<B: Backend>(
        &mut self,
        store: &mut ListStore<B>,
        intent: Intent,
    ) -> Result<Outcome, ListError> {
        tracing::trace!(?intent, "dispatching intent");
        match intent {
            Intent::Add(text) => Ok(match store.add(&text)? {
                Some(id) => Outcome::Added(id),
                None => Outcome::Ignored,
            }),
            Intent::EditRequest(id) => {
                let draft = store.start_edit(id)?.text.clone();
                self.editing = Some(id);
                Ok(Outcome::Editing { id, draft })
            }
            Intent::EditCommit(text) => {
                let Some(id) = self.editing else {
                    return Ok(Outcome::NothingPending);
                };
                match store.commit_edit(id, &text) {
                    Ok(()) => {
                        self.editing = None;
                        Ok(Outcome::Edited(id))
                    }
                    Err(ListError::NotFound(id)) => {
                        self.editing = None;
                        Err(ListError::NotFound(id))
                    }
                    // Draft stays open so the user can fix it.
                    Err(err) => Err(err),
                }
            }
            Intent::EditCancel => Ok(match self.editing.take() {
                Some(_) => Outcome::EditCanceled,
                None => Outcome::NothingPending,
            }),
            Intent::DeleteRequest(id) => {
                if store.get(id).is_none() {
                    return Ok(Outcome::NothingPending);
                }
                self.delete.request(id);
                Ok(Outcome::DeletePending(id))
            }
            Intent::DeleteConfirm => Ok(match self.delete.confirm() {
                Some(id) => {
                    if self.editing == Some(id) {
                        self.editing = None;
                    }
                    if store.delete(id) {
                        Outcome::Deleted(id)
                    } else {
                        Outcome::NothingPending
                    }
                }
                None => Outcome::NothingPending,
            }),
            Intent::DeleteCancel => Ok(match self.delete.cancel() {
                Some(_) => Outcome::DeleteCanceled,
                None => Outcome::NothingPending,
            }),
            Intent::Reorder { from, to } => Ok(if store.reorder(from, to)? {
                Outcome::Moved { from, to }
            } else {
                Outcome::Unmoved
            }),
            Intent::ClearRequest => {
                self.clear.request(());
                Ok(Outcome::ClearPending { count: store.len() })
            }
            Intent::ClearConfirm => Ok(match self.clear.confirm() {
                Some(()) => {
                    let count = store.len();
                    store.clear_all();
                    self.editing = None;
                    self.delete.cancel();
                    Outcome::Cleared { count }
                }
                None => Outcome::NothingPending,
            }),
            Intent::ClearCancel => Ok(match self.clear.cancel() {
                Some(()) => Outcome::ClearCanceled,
                None => Outcome::NothingPending,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use assert_matches::assert_matches;

    fn setup(texts: &[&str]) -> (ActionDispatcher, ListStore<MemoryBackend>) {
        let mut store = ListStore::load(MemoryBackend::new(), "localItems");
        for text in texts {
            store.add(text).expect("add");
        }
        (ActionDispatcher::new(), store)
    }

    #[test]
    fn add_reports_new_id_or_ignores_blank() -> anyhow::Result<()> {
        let (mut dispatcher, mut store) = setup(&[]);
        let outcome = dispatcher.dispatch(&mut store, Intent::Add("milk".into()))?;
        assert_matches!(outcome, Outcome::Added(_));
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::Add("  ".into()))?,
            Outcome::Ignored
        );
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn edit_flow_seeds_draft_and_commits() -> anyhow::Result<()> {
        let (mut dispatcher, mut store) = setup(&["milk"]);
        let id = store.items()[0].id;
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::EditRequest(id))?,
            Outcome::Editing { id, draft: "milk".into() }
        );
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::EditCommit(" ".into())),
            Err(ListError::EmptyText)
        );
        assert_eq!(dispatcher.editing(), Some(id));
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::EditCommit("soy milk".into()))?,
            Outcome::Edited(id)
        );
        assert_eq!(dispatcher.editing(), None);
        assert_eq!(store.get(id).map(|item| item.text.as_str()), Some("soy milk"));
        Ok(())
    }

    #[test]
    fn edit_cancel_leaves_item_untouched() -> anyhow::Result<()> {
        let (mut dispatcher, mut store) = setup(&["milk"]);
        let before = store.items().to_vec();
        dispatcher.dispatch(&mut store, Intent::EditRequest(before[0].id))?;
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::EditCancel)?,
            Outcome::EditCanceled
        );
        assert_eq!(store.items(), before.as_slice());
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::EditCommit("x".into()))?,
            Outcome::NothingPending
        );
        Ok(())
    }

    #[test]
    fn delete_needs_confirmation() -> anyhow::Result<()> {
        let (mut dispatcher, mut store) = setup(&["milk", "eggs"]);
        let id = store.items()[0].id;

        dispatcher.dispatch(&mut store, Intent::DeleteRequest(id))?;
        assert_eq!(store.len(), 2);
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::DeleteCancel)?,
            Outcome::DeleteCanceled
        );
        assert_eq!(store.len(), 2);

        dispatcher.dispatch(&mut store, Intent::DeleteRequest(id))?;
        assert_eq!(dispatcher.pending_delete(), Some(id));
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::DeleteConfirm)?,
            Outcome::Deleted(id)
        );
        assert!(store.get(id).is_none());
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::DeleteConfirm)?,
            Outcome::NothingPending
        );
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::DeleteRequest(id))?,
            Outcome::NothingPending
        );
        assert_eq!(dispatcher.pending_delete(), None);
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn clear_needs_confirmation() -> anyhow::Result<()> {
        let (mut dispatcher, mut store) = setup(&["milk", "eggs"]);
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::ClearRequest)?,
            Outcome::ClearPending { count: 2 }
        );
        assert!(dispatcher.clear_pending());
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::ClearCancel)?,
            Outcome::ClearCanceled
        );
        assert_eq!(store.len(), 2);

        dispatcher.dispatch(&mut store, Intent::ClearRequest)?;
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::ClearConfirm)?,
            Outcome::Cleared { count: 2 }
        );
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn reorder_reports_whether_anything_moved() -> anyhow::Result<()> {
        let (mut dispatcher, mut store) = setup(&["a", "b", "c"]);
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::Reorder { from: 0, to: 2 })?,
            Outcome::Moved { from: 0, to: 2 }
        );
        assert_eq!(
            dispatcher.dispatch(&mut store, Intent::Reorder { from: 1, to: 1 })?,
            Outcome::Unmoved
        );
        assert_matches!(
            dispatcher.dispatch(&mut store, Intent::Reorder { from: 3, to: 0 }),
            Err(ListError::IndexOutOfRange { index: 3, len: 3 })
        );
        Ok(())
    }
}
