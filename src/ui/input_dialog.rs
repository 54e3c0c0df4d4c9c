use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Clear, Paragraph, Widget, Wrap};

use crate::app::{App, Dialog};
use crate::text_input::TextArea;
use crate::theme::ThemeColors;

const POPUP_WIDTH: u16 = 64;

/// Modal popup for alerts, yes/no confirmations and one-line prompts.
pub struct InputDialog<'a> {
    app: &'a App,
}

impl<'a> InputDialog<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    pub fn render_popup(self, area: Rect, buf: &mut Buffer) {
        let Some(dialog) = &self.app.dialog else {
            return;
        };
        let theme = &self.app.theme;

        let (title, body, hint): (&str, Vec<Line<'static>>, Line<'static>) = match dialog {
            Dialog::Alert { message } => (
                "Notice",
                text_lines(theme, message),
                hint(theme, &[("Enter", "ok", true), ("Esc", "close", false)]),
            ),
            Dialog::Confirm { question } => (
                "Confirm",
                text_lines(theme, question),
                hint(theme, &[("y", "yes", true), ("n", "no", false)]),
            ),
            Dialog::Prompt { label, input, .. } => {
                let mut body = text_lines(theme, label);
                body.push(Line::default());
                body.extend(input_lines(theme, input));
                (
                    "Input",
                    body,
                    hint(theme, &[("Enter", "confirm", true), ("Esc", "cancel", false)]),
                )
            }
        };

        let popup_width = POPUP_WIDTH.min(area.width.saturating_sub(2));
        let content_width = popup_width.saturating_sub(4).max(1) as usize;
        let body_rows: usize = body
            .iter()
            .map(|l| l.width().max(1).div_ceil(content_width))
            .sum();
        // title + blank + body + blank + hint, plus padding
        let popup_height = (body_rows as u16 + 6).min(area.height.saturating_sub(2));

        let x = area.x + (area.width.saturating_sub(popup_width)) / 2;
        let y = area.y + (area.height.saturating_sub(popup_height)) / 2;
        let popup_area = Rect::new(x, y, popup_width, popup_height);

        super::render_overlay_dim(area, buf);
        Clear.render(popup_area, buf);

        let block = Block::default().style(Style::default().bg(theme.background_panel));
        let inner = block.inner(popup_area);
        block.render(popup_area, buf);

        let content = Rect::new(
            inner.x + 2,
            inner.y + 1,
            inner.width.saturating_sub(4),
            inner.height.saturating_sub(2),
        );
        if content.height < 3 {
            return;
        }

        let title_line = Line::from(Span::styled(
            title,
            Style::default().fg(theme.text).add_modifier(Modifier::BOLD),
        ));
        buf.set_line(content.x, content.y, &title_line, content.width);

        let body_area = Rect::new(
            content.x,
            content.y + 2,
            content.width,
            content.height.saturating_sub(4),
        );
        Paragraph::new(body)
            .wrap(Wrap { trim: false })
            .render(body_area, buf);

        let hint_y = content.y + content.height.saturating_sub(1);
        buf.set_line(content.x, hint_y, &hint, content.width);
    }
}

fn text_lines(theme: &ThemeColors, text: &str) -> Vec<Line<'static>> {
    text.lines()
        .map(|l| Line::from(Span::styled(l.to_string(), Style::default().fg(theme.text))))
        .collect()
}

fn input_lines(theme: &ThemeColors, input: &TextArea) -> Vec<Line<'static>> {
    let text_style = Style::default().fg(theme.text);
    input
        .lines
        .iter()
        .enumerate()
        .map(|(row, line)| {
            let prefix = Span::styled(
                if row == 0 { "> " } else { "  " },
                Style::default().fg(theme.accent),
            );
            if row != input.cursor_row {
                return Line::from(vec![prefix, Span::styled(line.clone(), text_style)]);
            }
            let at = input.cursor_col.min(line.len());
            let cursor = line[at..].chars().next();
            let after = at + cursor.map_or(0, char::len_utf8);
            Line::from(vec![
                prefix,
                Span::styled(line[..at].to_string(), text_style),
                Span::styled(
                    cursor.map_or(" ".to_string(), String::from),
                    Style::default()
                        .bg(theme.text)
                        .fg(theme.background)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::styled(line[after..].to_string(), text_style),
            ])
        })
        .collect()
}

fn hint(theme: &ThemeColors, keys: &[(&str, &str, bool)]) -> Line<'static> {
    let mut spans = Vec::new();
    for (key, label, primary) in keys {
        let color = if *primary { theme.success } else { theme.warning };
        spans.push(Span::styled(
            key.to_string(),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ));
        spans.push(Span::styled(
            format!(" {label}  "),
            Style::default().fg(theme.text_muted),
        ));
    }
    Line::from(spans)
}
