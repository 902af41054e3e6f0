//! Chat panel widget for the TUI.
//!
//! Displays the conversation, tool activity and command output.

use crate::tui::app::ChatMessage;
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Widget, Wrap},
};

/// Chat panel widget.
pub struct ChatPanel<'a> {
    messages: &'a [ChatMessage],
    /// Lines scrolled up from the bottom.
    scroll: usize,
}

impl<'a> ChatPanel<'a> {
    pub fn new(messages: &'a [ChatMessage], scroll: usize) -> Self {
        Self { messages, scroll }
    }
}

fn label_style(message: &ChatMessage) -> Style {
    let color = match message {
        ChatMessage::User(_) => Color::Cyan,
        ChatMessage::Assistant(_) => Color::Green,
        ChatMessage::Tool(_) => Color::Magenta,
        ChatMessage::Error(_) => Color::Red,
        ChatMessage::System(_) => Color::Yellow,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

/// Lines for all messages, separated by blank lines.
pub fn build_lines(messages: &[ChatMessage]) -> Vec<Line<'_>> {
    let mut lines = Vec::new();

    for (i, message) in messages.iter().enumerate() {
        if i > 0 {
            lines.push(Line::from(""));
        }

        let text_style = match message {
            ChatMessage::Tool(_) => Style::default().fg(Color::DarkGray),
            ChatMessage::Error(_) => Style::default().fg(Color::Red),
            _ => Style::default(),
        };

        let mut content = message.text().lines();
        let first = content.next().unwrap_or_default();
        lines.push(Line::from(vec![
            Span::styled(format!("{}: ", message.type_label()), label_style(message)),
            Span::styled(first, text_style),
        ]));
        lines.extend(content.map(|line| Line::from(Span::styled(line, text_style))));
    }

    lines
}

/// Rows the lines occupy when wrapped to `width` columns.
fn wrapped_height(lines: &[Line<'_>], width: usize) -> usize {
    let width = width.max(1);
    lines
        .iter()
        .map(|line| line.width().div_ceil(width).max(1))
        .sum()
}

impl Widget for ChatPanel<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray))
            .title(" Chat ");

        let lines = build_lines(self.messages);
        let inner_height = area.height.saturating_sub(2) as usize;
        let total = wrapped_height(&lines, area.width.saturating_sub(2) as usize);
        let offset = total
            .saturating_sub(inner_height)
            .saturating_sub(self.scroll);

        Paragraph::new(lines)
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((offset.min(u16::MAX as usize) as u16, 0))
            .render(area, buf);
    }
}
