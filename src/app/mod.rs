use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::themes::Palette;
use crate::config::AppConfig;
use crate::list::{ListError, ListStore, SyncState};
use crate::storage::Backend;
use crate::ui;

mod actions;
pub mod state;

pub use actions::{ActionDispatcher, Intent, Outcome};
pub use state::{AppState, EditOverlay, ItemSummary, OverlayState};

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    StartTyping,
    EditItem,
    DeleteItem,
    MoveItem,
    ClearAll,
    ToggleWrap,
}

pub struct App<B: Backend> {
    pub config: Arc<AppConfig>,
    store: ListStore<B>,
    dispatcher: ActionDispatcher,
    state: AppState,
    list_state: ListState,
    palette: Palette,
    should_quit: bool,
    tick_rate: Duration,
}

impl<B: Backend> App<B> {
    pub fn new(config: Arc<AppConfig>, store: ListStore<B>) -> Self {
        let state = AppState::load(&store, &config.display);
        let palette = Palette::for_theme(&config.theme);
        Self {
            config,
            store,
            dispatcher: ActionDispatcher::new(),
            state,
            list_state: ListState::default(),
            palette,
            should_quit: false,
            tick_rate: Duration::from_millis(250),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &ListStore<B> {
        &self.store
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            terminal
                .draw(|frame| {
                    ui::draw_app(frame, &self.state, &mut self.list_state, &self.palette)
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    /// Retries a diverged store and refreshes relative ages.
    pub fn on_tick(&mut self) {
        if matches!(self.store.sync_state(), SyncState::Diverged { .. }) && self.store.retry_sync() {
            self.state.set_status_message(Some("All changes saved"));
        }
        self.state.refresh(&self.store);
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        if self.handle_overlay_key(key) {
            return;
        }
        if self.state.typing {
            self.handle_input_key(key);
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::Char('a') | KeyCode::Char('i') if plain => Some(Action::StartTyping),
            KeyCode::Char('e') | KeyCode::Enter if plain => Some(Action::EditItem),
            KeyCode::Char('d') | KeyCode::Delete if plain => Some(Action::DeleteItem),
            KeyCode::Char('m') if plain => Some(Action::MoveItem),
            KeyCode::Char('C') => Some(Action::ClearAll),
            KeyCode::Char('W') => Some(Action::ToggleWrap),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::StartTyping => {
                self.state.begin_typing();
                self.state.set_status_message(None::<String>);
            }
            Action::EditItem => {
                let Some(id) = self.state.selected_id() else {
                    self.state.set_status_message(Some("No item selected"));
                    return;
                };
                if let Some(Outcome::Editing { id, draft }) = self.apply(Intent::EditRequest(id)) {
                    self.state.open_edit(id, draft);
                }
            }
            Action::DeleteItem => {
                let Some(id) = self.state.selected_id() else {
                    self.state.set_status_message(Some("No item selected"));
                    return;
                };
                if let Some(Outcome::DeletePending(id)) = self.apply(Intent::DeleteRequest(id)) {
                    self.state.open_delete_confirm(id);
                }
            }
            Action::MoveItem => {
                if self.state.begin_move() {
                    self.state.set_status_message(None::<String>);
                } else {
                    self.state.set_status_message(Some("Nothing to move"));
                }
            }
            Action::ClearAll => {
                if self.store.is_empty() {
                    self.state.set_status_message(Some("The list is already empty"));
                    return;
                }
                if let Some(Outcome::ClearPending { count }) = self.apply(Intent::ClearRequest) {
                    self.state.open_clear_confirm(count);
                }
            }
            Action::ToggleWrap => {
                let message = if self.state.toggle_wrap() {
                    "Word wrap enabled"
                } else {
                    "Word wrap disabled"
                };
                self.state.set_status_message(Some(message));
            }
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.state.stop_typing(),
            KeyCode::Enter => {
                let text = self.state.input.clone();
                match self.apply(Intent::Add(text)) {
                    Some(Outcome::Added(id)) => {
                        self.state.take_input();
                        self.state.select_item_by_id(id);
                    }
                    Some(Outcome::Ignored) => {
                        self.state.take_input();
                    }
                    _ => {}
                }
            }
            KeyCode::Backspace => self.state.pop_input(),
            KeyCode::Char(ch)
                if !key.modifiers.intersects(
                    KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER,
                ) =>
            {
                if !self.state.push_input(ch) {
                    self.state.set_status_message(Some(format!(
                        "Items are limited to {} characters",
                        crate::list::MAX_TEXT_LEN
                    )));
                }
            }
            _ => {}
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        match self.state.overlay() {
            Some(OverlayState::Edit(_)) => {
                match key.code {
                    KeyCode::Esc => {
                        self.apply(Intent::EditCancel);
                        self.state.close_overlay();
                    }
                    KeyCode::Enter => {
                        if !self.state.can_save_edit() {
                            self.state
                                .set_status_message(Some("Item text cannot be empty"));
                            return true;
                        }
                        let draft = self
                            .state
                            .edit_overlay()
                            .map(|edit| edit.draft.clone())
                            .unwrap_or_default();
                        match self.apply(Intent::EditCommit(draft)) {
                            Some(Outcome::Edited(_)) | Some(Outcome::NothingPending) => {
                                self.state.close_overlay();
                            }
                            _ if self.dispatcher.editing().is_none() => {
                                self.state.close_overlay();
                            }
                            _ => {}
                        }
                    }
                    KeyCode::Backspace => self.state.pop_edit_char(),
                    KeyCode::Char(ch) if plain => {
                        self.state.push_edit_char(ch);
                    }
                    _ => {}
                }
                true
            }
            Some(OverlayState::DeleteConfirm { .. }) => {
                let intent = match key.code {
                    KeyCode::Enter | KeyCode::Char('y') => Some(Intent::DeleteConfirm),
                    KeyCode::Esc | KeyCode::Char('n') => Some(Intent::DeleteCancel),
                    _ => None,
                };
                if let Some(intent) = intent {
                    self.state.close_overlay();
                    self.apply(intent);
                }
                true
            }
            Some(OverlayState::ClearConfirm { .. }) => {
                let intent = match key.code {
                    KeyCode::Enter | KeyCode::Char('y') => Some(Intent::ClearConfirm),
                    KeyCode::Esc | KeyCode::Char('n') => Some(Intent::ClearCancel),
                    _ => None,
                };
                if let Some(intent) = intent {
                    self.state.close_overlay();
                    self.apply(intent);
                }
                true
            }
            Some(OverlayState::Moving { .. }) => {
                match key.code {
                    KeyCode::Char('j') | KeyCode::Down => self.state.shift_move_target(1),
                    KeyCode::Char('k') | KeyCode::Up => self.state.shift_move_target(-1),
                    KeyCode::Enter | KeyCode::Char('m') => {
                        if let Some((from, to)) = self.state.move_range() {
                            self.state.close_overlay();
                            if let Some(Outcome::Moved { to, .. }) =
                                self.apply(Intent::Reorder { from, to })
                            {
                                self.state.selected = to;
                            }
                        }
                    }
                    KeyCode::Esc => {
                        self.state.close_overlay();
                        self.state.set_status_message(Some("Move canceled"));
                    }
                    _ => {}
                }
                true
            }
            None => false,
        }
    }

    /// Dispatches one intent and folds the result back into the view.
    fn apply(&mut self, intent: Intent) -> Option<Outcome> {
        let result = self.dispatcher.dispatch(&mut self.store, intent);
        self.state.refresh(&self.store);
        match result {
            Ok(outcome) => {
                if let Some(message) = describe(&outcome) {
                    self.state.set_status_message(Some(message));
                }
                Some(outcome)
            }
            Err(err) => {
                tracing::warn!(%err, "list operation rejected");
                self.state.set_status_message(Some(error_message(&err)));
                None
            }
        }
    }
}

fn describe(outcome: &Outcome) -> Option<String> {
    let message = match outcome {
        Outcome::Added(_) => "Item added".to_string(),
        Outcome::Ignored => "Type something first".to_string(),
        Outcome::Editing { .. } => "Editing: Enter save • Esc cancel".to_string(),
        Outcome::Edited(_) => "Item updated".to_string(),
        Outcome::EditCanceled => "Edit canceled".to_string(),
        Outcome::DeletePending(_) => "Delete item? Enter/y confirm • Esc/n cancel".to_string(),
        Outcome::Deleted(_) => "Item deleted".to_string(),
        Outcome::DeleteCanceled => "Delete canceled".to_string(),
        Outcome::Moved { from, to } => format!("Moved item from #{} to #{}", from + 1, to + 1),
        Outcome::Unmoved => "Item stayed in place".to_string(),
        Outcome::ClearPending { .. } => "Clear the whole list? Enter/y confirm • Esc/n cancel".to_string(),
        Outcome::Cleared { count } => format!("Cleared {count} item(s)"),
        Outcome::ClearCanceled => "Clear canceled".to_string(),
        Outcome::NothingPending => return None,
    };
    Some(message)
}

fn error_message(err: &ListError) -> String {
    match err {
        ListError::EmptyText => "Item text cannot be empty".to_string(),
        ListError::NotFound(_) => "That item no longer exists".to_string(),
        other => other.to_string(),
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
