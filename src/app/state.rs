use time::macros::format_description;
use time::{Duration, OffsetDateTime, Weekday};
use unicode_segmentation::UnicodeSegmentation;

use crate::config::DisplayOptions;
use crate::list::{reorder, ItemId, ListStore, SyncState, MAX_TEXT_LEN};
use crate::storage::Backend;
use crate::wrap::wrap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSummary {
    pub id: ItemId,
    pub text: String,
    pub wrapped: String,
    pub age: String,
    pub edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOverlay {
    pub id: ItemId,
    pub draft: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    Edit(EditOverlay),
    DeleteConfirm { id: ItemId, text: String },
    ClearConfirm { count: usize },
    /// An item picked up for reordering, previewed at `to`.
    Moving { from: usize, to: usize },
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub today: String,
    pub summary: String,
    pub items: Vec<ItemSummary>,
    pub selected: usize,
    pub input: String,
    pub typing: bool,
    pub overlay: Option<OverlayState>,
    pub status_message: Option<String>,
    pub sync_notice: Option<String>,
    pub wrap_enabled: bool,
    pub relative_time: bool,
}

impl AppState {
    pub fn new(display: &DisplayOptions) -> Self {
        Self {
            today: today_label(local_now().weekday()),
            summary: String::new(),
            items: Vec::new(),
            selected: 0,
            input: String::new(),
            typing: false,
            overlay: None,
            status_message: None,
            sync_notice: None,
            wrap_enabled: display.wrap_long_words,
            relative_time: display.relative_time,
        }
    }

    pub fn load<B: Backend>(store: &ListStore<B>, display: &DisplayOptions) -> Self {
        let mut state = Self::new(display);
        state.refresh(store);
        state
    }

    /// Rebuilds the view from the store, keeping the selection on the same
    /// item where possible.
    pub fn refresh<B: Backend>(&mut self, store: &ListStore<B>) {
        let keep = self.selected_id();
        let now = OffsetDateTime::now_utc();
        self.items = store
            .display()
            .map(|item| ItemSummary {
                id: item.id,
                text: item.text.clone(),
                wrapped: wrap(&item.text),
                age: if self.relative_time {
                    format_relative_time(item.date, now)
                } else {
                    format_absolute_time(item.date)
                },
                edited: item.edited,
            })
            .collect();
        self.summary = store.summary().message();
        self.sync_notice = match store.sync_state() {
            SyncState::Synced => None,
            SyncState::Diverged { message, .. } => {
                Some(format!("changes not saved yet ({message}); retrying"))
            }
        };
        match keep {
            Some(id) => self.select_item_by_id(id),
            None => self.normalize_selection(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn selected(&self) -> Option<&ItemSummary> {
        self.items.get(self.selected)
    }

    pub fn selected_id(&self) -> Option<ItemId> {
        self.selected().map(|item| item.id)
    }

    pub fn select_item_by_id(&mut self, id: ItemId) {
        if let Some(idx) = self.items.iter().position(|item| item.id == id) {
            self.selected = idx;
        } else {
            self.normalize_selection();
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.items.is_empty() {
            return;
        }
        self.selected = clamp_index(self.selected, delta, self.items.len());
    }

    fn normalize_selection(&mut self) {
        if self.items.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.items.len() {
            self.selected = self.items.len() - 1;
        }
    }

    /// Items in the order they should be drawn, with a picked-up item shown
    /// at its prospective slot.
    pub fn visible_items(&self) -> Vec<&ItemSummary> {
        let items = self.items.iter().collect::<Vec<_>>();
        match self.overlay {
            Some(OverlayState::Moving { from, to }) if from < items.len() && to < items.len() => {
                reorder(items, from, to)
            }
            _ => items,
        }
    }

    /// Row to highlight in `visible_items`.
    pub fn highlighted_row(&self) -> usize {
        match self.overlay {
            Some(OverlayState::Moving { to, .. }) => to,
            _ => self.selected,
        }
    }

    pub fn wrap_enabled(&self) -> bool {
        self.wrap_enabled
    }

    pub fn toggle_wrap(&mut self) -> bool {
        self.wrap_enabled = !self.wrap_enabled;
        self.wrap_enabled
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn begin_typing(&mut self) {
        self.typing = true;
    }

    pub fn stop_typing(&mut self) {
        self.typing = false;
    }

    pub fn push_input(&mut self, ch: char) -> bool {
        push_capped(&mut self.input, ch)
    }

    pub fn pop_input(&mut self) {
        pop_grapheme(&mut self.input);
    }

    pub fn take_input(&mut self) -> String {
        std::mem::take(&mut self.input)
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn open_edit(&mut self, id: ItemId, draft: String) {
        self.overlay = Some(OverlayState::Edit(EditOverlay { id, draft }));
    }

    pub fn edit_overlay(&self) -> Option<&EditOverlay> {
        match self.overlay.as_ref() {
            Some(OverlayState::Edit(edit)) => Some(edit),
            _ => None,
        }
    }

    pub fn edit_overlay_mut(&mut self) -> Option<&mut EditOverlay> {
        match self.overlay.as_mut() {
            Some(OverlayState::Edit(edit)) => Some(edit),
            _ => None,
        }
    }

    pub fn push_edit_char(&mut self, ch: char) -> bool {
        self.edit_overlay_mut()
            .map(|edit| push_capped(&mut edit.draft, ch))
            .unwrap_or(false)
    }

    pub fn pop_edit_char(&mut self) {
        if let Some(edit) = self.edit_overlay_mut() {
            pop_grapheme(&mut edit.draft);
        }
    }

    /// Save is offered only while the draft has visible text.
    pub fn can_save_edit(&self) -> bool {
        self.edit_overlay()
            .is_some_and(|edit| !edit.draft.trim().is_empty())
    }

    pub fn open_delete_confirm(&mut self, id: ItemId) {
        let text = self
            .items
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.text.clone())
            .unwrap_or_default();
        self.overlay = Some(OverlayState::DeleteConfirm { id, text });
    }

    pub fn open_clear_confirm(&mut self, count: usize) {
        self.overlay = Some(OverlayState::ClearConfirm { count });
    }

    pub fn begin_move(&mut self) -> bool {
        if self.items.is_empty() {
            return false;
        }
        self.overlay = Some(OverlayState::Moving {
            from: self.selected,
            to: self.selected,
        });
        true
    }

    pub fn shift_move_target(&mut self, delta: isize) {
        let len = self.items.len();
        if let Some(OverlayState::Moving { to, .. }) = self.overlay.as_mut() {
            *to = clamp_index(*to, delta, len);
        }
    }

    pub fn move_range(&self) -> Option<(usize, usize)> {
        match self.overlay {
            Some(OverlayState::Moving { from, to }) => Some((from, to)),
            _ => None,
        }
    }
}

fn clamp_index(current: usize, delta: isize, len: usize) -> usize {
    let next = current as isize + delta;
    next.clamp(0, len as isize - 1) as usize
}

fn push_capped(buffer: &mut String, ch: char) -> bool {
    if ch.is_control() || buffer.graphemes(true).count() >= MAX_TEXT_LEN {
        return false;
    }
    buffer.push(ch);
    true
}

fn pop_grapheme(buffer: &mut String) {
    if let Some((idx, _)) = buffer.grapheme_indices(true).next_back() {
        buffer.truncate(idx);
    }
}

fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

pub fn today_label(weekday: Weekday) -> String {
    format!("today is {}", weekday.to_string().to_lowercase())
}

pub fn format_relative_time(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let diff = now - then;
    if diff < Duration::seconds(45) {
        return "just now".to_string();
    }
    let (count, unit) = if diff < Duration::minutes(45) {
        (diff.whole_minutes().max(1), "minute")
    } else if diff < Duration::hours(22) {
        (diff.whole_hours().max(1), "hour")
    } else if diff < Duration::days(7) {
        (diff.whole_days().max(1), "day")
    } else if diff < Duration::days(28) {
        (diff.whole_weeks(), "week")
    } else {
        return format_absolute_time(then);
    };
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

pub fn format_absolute_time(date: OffsetDateTime) -> String {
    date.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| date.unix_timestamp().to_string())
}
