use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Widget};

use crate::app::App;
use crate::keymap::{Action, Focus};
use crate::text_input::TextArea;
use crate::theme::ThemeColors;

/// Rows the input box grows to before it starts scrolling.
pub const MAX_INPUT_ROWS: u16 = 6;

/// Height of the input box including borders for the current text.
pub fn input_height(app: &App, width: u16) -> u16 {
    let rows = visual_rows(&app.input, width.saturating_sub(2) as usize).0.len() as u16;
    rows.clamp(1, MAX_INPUT_ROWS) + 2
}

/// Split the buffer into (line, byte_start, byte_end) rows no wider than
/// `width` characters, and report which row holds the cursor.
pub fn visual_rows(area: &TextArea, width: usize) -> (Vec<(usize, usize, usize)>, usize) {
    let mut rows = Vec::new();
    let mut cursor_row = 0;

    for (li, text) in area.lines.iter().enumerate() {
        if width == 0 || text.is_empty() {
            if li == area.cursor_row {
                cursor_row = rows.len();
            }
            rows.push((li, 0, text.len()));
            continue;
        }
        let mut pos = 0;
        while pos < text.len() {
            let start = pos;
            let mut end = pos;
            for (col, ch) in text[pos..].chars().enumerate() {
                if col >= width {
                    break;
                }
                end += ch.len_utf8();
            }
            if li == area.cursor_row
                && area.cursor_col >= start
                && (area.cursor_col < end || (area.cursor_col == end && end == text.len()))
            {
                cursor_row = rows.len();
            }
            rows.push((li, start, end));
            pos = end;
        }
    }
    (rows, cursor_row)
}

pub struct InputBox<'a> {
    app: &'a App,
}

impl<'a> InputBox<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    fn title(&self) -> Line<'static> {
        let theme = &self.app.theme;
        let key = |action| {
            self.app
                .keymap
                .key_for(action)
                .map(|b| b.display())
                .unwrap_or_default()
        };
        let mut spans = vec![Span::styled(
            " Ask ",
            Style::default().fg(theme.primary).add_modifier(Modifier::BOLD),
        )];
        if self.app.optimizing {
            spans.push(Span::styled(
                "optimizing... ",
                Style::default().fg(theme.warning),
            ));
        } else if self.app.chat.is_sending() {
            spans.push(Span::styled("sending... ", Style::default().fg(theme.warning)));
        } else {
            spans.push(Span::styled(
                format!(
                    "{} send · {} optimize · Alt+Enter newline ",
                    key(Action::Send),
                    key(Action::OptimizePrompt)
                ),
                Style::default().fg(theme.text_muted),
            ));
        }
        Line::from(spans)
    }
}

impl<'a> Widget for InputBox<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let theme = &self.app.theme;
        let focused = self.app.focus == Focus::Input && self.app.dialog.is_none();
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(if focused {
                theme.border_active
            } else {
                theme.border
            }))
            .title(self.title())
            .style(Style::default().bg(theme.background_panel));
        let inner = block.inner(area);
        block.render(area, buf);
        if inner.width == 0 || inner.height == 0 {
            return;
        }

        let input = &self.app.input;
        if input.is_blank() && !focused {
            Paragraph::new(Span::styled(
                "Type a question about the project...",
                Style::default().fg(theme.text_muted),
            ))
            .render(inner, buf);
            return;
        }

        let (rows, cursor_row) = visual_rows(input, inner.width as usize);
        let height = inner.height as usize;
        let first = (cursor_row + 1).saturating_sub(height);

        for (vi, &(li, start, end)) in rows.iter().skip(first).take(height).enumerate() {
            let y = inner.y + vi as u16;
            let chunk = &input.lines[li][start..end];
            let line = if focused && first + vi == cursor_row {
                cursor_line(theme, chunk, input.cursor_col.saturating_sub(start))
            } else {
                Line::from(Span::styled(chunk.to_string(), Style::default().fg(theme.text)))
            };
            Paragraph::new(line).render(Rect::new(inner.x, y, inner.width, 1), buf);
        }
    }
}

fn cursor_line(theme: &ThemeColors, chunk: &str, at: usize) -> Line<'static> {
    let at = at.min(chunk.len());
    let cursor = chunk[at..].chars().next();
    let after = at + cursor.map_or(0, char::len_utf8);
    Line::from(vec![
        Span::styled(chunk[..at].to_string(), Style::default().fg(theme.text)),
        Span::styled(
            cursor.map_or(" ".to_string(), String::from),
            Style::default()
                .bg(theme.text)
                .fg(theme.background)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(chunk[after..].to_string(), Style::default().fg(theme.text)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_wrap_long_lines() {
        let area = TextArea::from_text("abcdefg\nxy");
        let (rows, cursor) = visual_rows(&area, 3);
        assert_eq!(rows, vec![(0, 0, 3), (0, 3, 6), (0, 6, 7), (1, 0, 2)]);
        assert_eq!(cursor, 3);
    }

    #[test]
    fn test_cursor_on_empty_line() {
        let mut area = TextArea::from_text("abc\n");
        area.cursor_row = 1;
        area.cursor_col = 0;
        let (rows, cursor) = visual_rows(&area, 10);
        assert_eq!(rows.len(), 2);
        assert_eq!(cursor, 1);
    }
}
