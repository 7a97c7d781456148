use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, ItemSummary, OverlayState};
use crate::config::themes::Palette;

const INPUT_PLACEHOLDER: &str = "Add item to shopping list";

pub fn draw_app(frame: &mut Frame, state: &AppState, list_state: &mut ListState, palette: &Palette) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(2),
        ])
        .split(frame.size());

    frame.render_widget(header(state, palette), vertical[0]);

    let visible = state.visible_items();
    let moving = state.move_range().map(|(_, to)| to);
    let mut items = visible
        .iter()
        .enumerate()
        .map(|(row, item)| item_lines(item, state.wrap_enabled(), moving == Some(row), palette))
        .map(ListItem::new)
        .collect::<Vec<_>>();
    if items.is_empty() {
        items.push(ListItem::new(Span::styled(
            "Nothing here yet. Press `a` to add an item.",
            Style::default().fg(palette.muted),
        )));
        list_state.select(None);
    } else {
        list_state.select(Some(state.highlighted_row()));
    }
    let list = List::new(items)
        .block(
            Block::default()
                .title("Shopping list")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.accent)),
        )
        .highlight_style(
            Style::default()
                .bg(palette.selection_bg)
                .fg(palette.selection_fg)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, vertical[1], list_state);

    frame.render_widget(input_box(state, palette), vertical[2]);
    if state.typing && state.overlay().is_none() {
        let width = state.input.width() as u16;
        let x = (vertical[2].x + 1 + width).min(vertical[2].right().saturating_sub(2));
        frame.set_cursor(x, vertical[2].y + 1);
    }

    frame.render_widget(
        Paragraph::new(build_status_line(state, palette)).wrap(Wrap { trim: true }),
        vertical[3],
    );

    render_overlay(frame, state, palette);
}

fn header(state: &AppState, palette: &Palette) -> Paragraph<'static> {
    let (lead, day) = state
        .today
        .rsplit_once(' ')
        .map(|(lead, day)| (format!("{lead} "), day.to_string()))
        .unwrap_or_else(|| (String::new(), state.today.clone()));
    let lines = vec![
        Line::from(vec![
            Span::styled(lead, Style::default().add_modifier(Modifier::BOLD)),
            Span::styled(
                day,
                Style::default()
                    .fg(palette.highlight)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        summary_line(&state.summary, palette),
    ];
    Paragraph::new(lines)
        .alignment(ratatui::layout::Alignment::Center)
        .block(Block::default().borders(Borders::ALL))
}

/// Highlights the count inside the summary sentence.
fn summary_line(summary: &str, palette: &Palette) -> Line<'static> {
    let mut spans = Vec::new();
    for (idx, word) in summary.split(' ').enumerate() {
        if idx > 0 {
            spans.push(Span::raw(" "));
        }
        if word.chars().all(|ch| ch.is_ascii_digit()) && !word.is_empty() {
            spans.push(Span::styled(
                word.to_string(),
                Style::default().fg(palette.highlight),
            ));
        } else {
            spans.push(Span::raw(word.to_string()));
        }
    }
    Line::from(spans)
}

fn item_lines(item: &ItemSummary, wrap: bool, picked_up: bool, palette: &Palette) -> Text<'static> {
    let text = if wrap { &item.wrapped } else { &item.text };
    let mut title = Vec::new();
    if picked_up {
        title.push(Span::styled(
            "↕ ",
            Style::default()
                .fg(palette.highlight)
                .add_modifier(Modifier::BOLD),
        ));
    }
    title.push(Span::raw(text.clone()));
    let mut meta = vec![Span::styled(item.age.clone(), Style::default().fg(palette.muted))];
    if item.edited {
        meta.push(Span::styled(
            " · edited",
            Style::default()
                .fg(palette.muted)
                .add_modifier(Modifier::ITALIC),
        ));
    }
    Text::from(vec![Line::from(title), Line::from(meta)])
}

fn input_box(state: &AppState, palette: &Palette) -> Paragraph<'static> {
    let content = if state.input.is_empty() && !state.typing {
        Span::styled(INPUT_PLACEHOLDER, Style::default().fg(palette.muted))
    } else {
        Span::raw(state.input.clone())
    };
    let border = if state.typing {
        Style::default().fg(palette.confirm)
    } else {
        Style::default()
    };
    Paragraph::new(Line::from(content)).block(
        Block::default()
            .title(if state.typing { "Add (Enter)" } else { "Add" })
            .borders(Borders::ALL)
            .border_style(border),
    )
}

fn build_status_line(state: &AppState, palette: &Palette) -> Text<'static> {
    let mut lines = Vec::new();
    if let Some(notice) = &state.sync_notice {
        lines.push(Line::from(Span::styled(
            notice.clone(),
            Style::default()
                .fg(palette.danger)
                .add_modifier(Modifier::BOLD),
        )));
    }
    if let Some(message) = &state.status_message {
        lines.push(Line::from(Span::raw(message.clone())));
    }
    let hints = match state.overlay() {
        Some(OverlayState::Moving { .. }) => "j/k move • Enter drop • Esc cancel",
        Some(_) => "",
        None if state.typing => "Enter add • Esc done",
        None => "a add • e edit • d delete • m move • C clear all • W wrap • q quit",
    };
    if !hints.is_empty() {
        lines.push(Line::from(Span::styled(hints, Style::default().fg(palette.muted))));
    }
    Text::from(lines)
}

fn render_overlay(frame: &mut Frame, state: &AppState, palette: &Palette) {
    match state.overlay() {
        Some(OverlayState::Edit(edit)) => {
            let area = centered_rect(60, 30, frame.size());
            frame.render_widget(Clear, area);
            let mut draft = edit.draft.clone();
            draft.push('▌');
            let hint = if state.can_save_edit() {
                "Enter to save • Esc to cancel"
            } else {
                "Text cannot be empty • Esc to cancel"
            };
            let paragraph = Paragraph::new(vec![
                Line::from(draft),
                Line::from(""),
                Line::from(Span::styled(hint, Style::default().fg(palette.muted))),
            ])
            .block(
                Block::default()
                    .title("Edit item")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.accent)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::DeleteConfirm { text, .. }) => {
            let area = centered_rect(60, 30, frame.size());
            frame.render_widget(Clear, area);
            let paragraph = Paragraph::new(vec![
                Line::from(format!("Remove '{text}' from the list?")),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter/y to delete • Esc/n to keep",
                    Style::default().fg(palette.muted),
                )),
            ])
            .block(
                Block::default()
                    .title("Delete item")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.danger)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::ClearConfirm { count }) => {
            let area = centered_rect(70, 30, frame.size());
            frame.render_widget(Clear, area);
            let noun = if *count == 1 { "item" } else { "items" };
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Are you sure you want to clear the list?",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!("{count} {noun} will be removed.")),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter/y to clear • Esc/n to cancel",
                    Style::default().fg(palette.muted),
                )),
            ])
            .block(
                Block::default()
                    .title("Clear all")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.danger)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        Some(OverlayState::Moving { .. }) | None => {}
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
