//! Confirmation dialog widget for tool calls that need approval.

use crossterm::event::KeyCode;
use ratatui::{
    layout::{Alignment, Constraint, Flex, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

use crate::tools::RiskLevel;
use crate::tui::app::PendingConfirm;

/// Blank line, key hints and the two borders.
const DIALOG_CHROME: usize = 4;

/// The slice of the prompt that fits on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptView {
    pub lines: Vec<String>,
    /// Index of the first visible line.
    pub offset: usize,
    pub total: usize,
}

impl PromptView {
    pub fn is_partial(&self) -> bool {
        self.lines.len() < self.total
    }

    pub fn max_offset(&self) -> usize {
        self.total.saturating_sub(self.lines.len())
    }
}

/// Renders a modal dialog for the pending tool call.
///
/// High-risk calls get a red frame, medium ones yellow. The dialog grows
/// with the prompt; when the screen is too short the prompt scrolls.
pub fn render_confirmation_dialog(frame: &mut Frame, pending: &PendingConfirm) {
    let area = frame.area();
    let view = prompt_view(&pending.prompt, area, pending.scroll);

    let width = dialog_width(area);
    let indicator = usize::from(view.is_partial());
    let dialog_height = ((view.lines.len() + indicator + DIALOG_CHROME) as u16).min(area.height);
    let dialog_area = center_rect(width, dialog_height, area);

    frame.render_widget(Clear, dialog_area);

    let border_color = risk_color(pending.risk);
    let title = format!(" Approve {}? ", pending.tool);

    let mut lines = Vec::new();
    for line in &view.lines {
        let style = if line.starts_with("Warning:") {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(line.clone(), style)));
    }
    if view.is_partial() {
        lines.push(Line::from(Span::styled(
            format!(
                "lines {}-{} of {} (Up/Down to scroll)",
                view.offset + 1,
                view.offset + view.lines.len(),
                view.total
            ),
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines.push(Line::from(""));

    lines.push(Line::from(vec![
        Span::styled(
            "[y/Enter]",
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" approve  "),
        Span::styled(
            "[n/Esc]",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        Span::raw(" decline"),
    ]));

    let block = Block::default()
        .title(title)
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .style(Style::default().bg(Color::Black));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .alignment(Alignment::Left);

    frame.render_widget(paragraph, dialog_area);
}

fn dialog_width(area: Rect) -> u16 {
    let width = (area.width as f32 * 0.6).clamp(30.0, 90.0) as u16;
    width.min(area.width)
}

/// Wraps the prompt for `area` and picks the lines visible at `scroll`.
///
/// `scroll` is clamped so the last page stays full.
pub fn prompt_view(prompt: &str, area: Rect, scroll: usize) -> PromptView {
    let wrapped = wrap_text(prompt, dialog_width(area).saturating_sub(4) as usize);
    let total = wrapped.len();

    let room = (area.height as usize).saturating_sub(DIALOG_CHROME).max(1);
    // A partial view gives up one row to the position line.
    let visible = if total > room { room.saturating_sub(1).max(1) } else { total };
    let offset = scroll.min(total - visible);

    PromptView {
        lines: wrapped.into_iter().skip(offset).take(visible).collect(),
        offset,
        total,
    }
}

fn risk_color(risk: RiskLevel) -> Color {
    match risk {
        RiskLevel::Low => Color::Green,
        RiskLevel::Medium => Color::Yellow,
        RiskLevel::High => Color::Red,
    }
}

/// Word-wraps text to `max_width`, keeping existing line breaks.
fn wrap_text(text: &str, max_width: usize) -> Vec<String> {
    let max_width = max_width.max(1);
    let mut lines = Vec::new();

    for line in text.lines() {
        if line.chars().count() <= max_width {
            lines.push(line.to_string());
            continue;
        }

        let mut current = String::new();
        for word in line.split_whitespace().flat_map(|w| split_long(w, max_width)) {
            if current.is_empty() {
                current = word.to_string();
            } else if current.chars().count() + 1 + word.chars().count() <= max_width {
                current.push(' ');
                current.push_str(&word);
            } else {
                lines.push(std::mem::take(&mut current));
                current = word.to_string();
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
    }

    lines
}

/// Applies a scroll key to the prompt offset.
pub fn scroll_offset(prompt: &str, area: Rect, current: usize, code: KeyCode) -> usize {
    let view = prompt_view(prompt, area, current);
    let page = view.lines.len().max(1);
    let offset = match code {
        KeyCode::Up => view.offset.saturating_sub(1),
        KeyCode::Down => view.offset + 1,
        KeyCode::PageUp => view.offset.saturating_sub(page),
        KeyCode::PageDown => view.offset + page,
        KeyCode::Home => 0,
        KeyCode::End => view.max_offset(),
        _ => view.offset,
    };
    offset.min(view.max_offset())
}

fn split_long(word: &str, max_width: usize) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    chars.chunks(max_width).map(|c| c.iter().collect()).collect()
}

/// Centers a rectangle of the given size within the parent area.
fn center_rect(width: u16, height: u16, area: Rect) -> Rect {
    let horizontal = Layout::horizontal([Constraint::Length(width)]).flex(Flex::Center);
    let vertical = Layout::vertical([Constraint::Length(height)]).flex(Flex::Center);

    let [area] = vertical.areas(area);
    let [area] = horizontal.areas(area);
    area
}
