use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Widget};

use crate::app::{App, ContextRow};
use crate::context::FileEntry;
use crate::keymap::Focus;
use crate::theme::ThemeColors;

use super::banner_style;

/// The file selector: one header per container followed by its files.
pub struct ContextPanel<'a> {
    app: &'a App,
}

impl<'a> ContextPanel<'a> {
    pub fn new(app: &'a App) -> Self {
        Self { app }
    }

    fn row_line(&self, row: ContextRow, under_cursor: bool) -> Option<Line<'static>> {
        let theme = &self.app.theme;
        let context = &self.app.context;
        let line = match row {
            ContextRow::Header(c) => {
                let container = context.containers().get(c)?;
                let mark = checkbox(container.all_checked());
                Line::from(vec![
                    Span::styled(format!("{mark} "), Style::default().fg(theme.accent)),
                    Span::styled(
                        container.name.clone(),
                        Style::default()
                            .fg(theme.secondary)
                            .add_modifier(Modifier::BOLD),
                    ),
                    Span::styled(
                        format!(" ({})", container.files.len()),
                        Style::default().fg(theme.text_muted),
                    ),
                ])
            }
            ContextRow::File(at) => file_line(theme, context.entry(at)?),
        };
        Some(if under_cursor && self.app.focus == Focus::Context {
            line.patch_style(Style::default().bg(theme.background_element))
        } else {
            line
        })
    }
}

fn checkbox(checked: bool) -> &'static str {
    if checked {
        "[x]"
    } else {
        "[ ]"
    }
}

fn file_line(theme: &ThemeColors, file: &FileEntry) -> Line<'static> {
    let mut spans = vec![
        Span::raw("  "),
        Span::styled(
            format!("{} ", checkbox(file.checked)),
            Style::default().fg(if file.checked {
                theme.success
            } else {
                theme.text_muted
            }),
        ),
        Span::styled(file.path.clone(), Style::default().fg(theme.text)),
    ];
    match (file.use_yaml, file.yaml_pending()) {
        (_, true) => spans.push(Span::styled(" yaml…", Style::default().fg(theme.warning))),
        (Some(true), false) => spans.push(Span::styled(" yaml", Style::default().fg(theme.info))),
        (Some(false), false) => {
            spans.push(Span::styled(" src", Style::default().fg(theme.text_muted)))
        }
        (None, false) => {}
    }
    Line::from(spans)
}

impl<'a> Widget for ContextPanel<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let theme = &self.app.theme;
        let focused = self.app.focus == Focus::Context;
        let mut title = vec![Span::styled(
            " Files ",
            Style::default().fg(theme.primary).add_modifier(Modifier::BOLD),
        )];
        if self.app.context.is_updating() {
            title.push(Span::styled("updating... ", Style::default().fg(theme.warning)));
        } else if self.app.searching {
            title.push(Span::styled("searching... ", Style::default().fg(theme.warning)));
        }
        let block = Block::default()
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(if focused {
                theme.border_active
            } else {
                theme.border
            }))
            .title(Line::from(title))
            .style(Style::default().bg(theme.background_panel));
        let inner = block.inner(area);
        block.render(area, buf);
        if inner.height == 0 {
            return;
        }

        let banner = self.app.context.status.as_ref();
        let list_height = inner.height.saturating_sub(banner.map_or(0, |_| 1)) as usize;

        let rows = self.app.context_rows();
        if rows.is_empty() {
            Paragraph::new(Span::styled(
                "No files in context.",
                Style::default().fg(theme.text_muted),
            ))
            .render(inner, buf);
        } else {
            let cursor = self.app.context_cursor.min(rows.len() - 1);
            let offset = (cursor + 1).saturating_sub(list_height);
            let lines: Vec<Line<'static>> = rows
                .iter()
                .enumerate()
                .skip(offset)
                .take(list_height)
                .filter_map(|(i, row)| self.row_line(*row, i == cursor))
                .collect();
            Paragraph::new(lines).render(
                Rect::new(inner.x, inner.y, inner.width, list_height as u16),
                buf,
            );
        }

        if let Some(banner) = banner {
            let y = inner.y + inner.height - 1;
            Paragraph::new(Span::styled(banner.text.clone(), banner_style(theme, banner.kind)))
                .render(Rect::new(inner.x, y, inner.width, 1), buf);
        }
    }
}
