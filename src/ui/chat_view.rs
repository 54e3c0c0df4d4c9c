use std::collections::HashMap;
use std::ops::Range;

use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph, Widget};

use crate::app::{App, BlockRef};
use crate::chat::{hide_label, ChatMessage, MessageKind, MessageOp};
use crate::keymap::{Action, Focus};
use crate::models::Role;
use crate::text_input::TextArea;
use crate::theme::ThemeColors;

/// Wrapped chat lines plus where each message landed.
pub struct ChatLayout {
    pub lines: Vec<Line<'static>>,
    pub spans: HashMap<crate::chat::MessageKey, Range<usize>>,
}

/// Draw the chat pane, adjusting `app.chat_scroll` so the newest message
/// (after a send) or a newly selected one is visible.
pub fn draw_chat(app: &mut App, area: Rect, buf: &mut Buffer) {
    let focused = app.focus == Focus::Chat;
    let border = if focused {
        app.theme.border_active
    } else {
        app.theme.border
    };
    let title = format!(" {} ", app.session.project);
    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border))
        .title(Span::styled(
            title,
            Style::default().fg(app.theme.primary).add_modifier(Modifier::BOLD),
        ))
        .style(Style::default().bg(app.theme.background));
    let inner = block.inner(area);
    block.render(area, buf);
    if inner.width == 0 || inner.height == 0 {
        return;
    }

    let layout = build_layout(app, inner.width as usize);
    let height = inner.height as usize;
    let max_scroll = layout.lines.len().saturating_sub(height);

    if app.chat.scroll_to_bottom {
        app.chat.scroll_to_bottom = false;
        app.chat_scroll = max_scroll;
    } else if app.reveal_selected {
        app.reveal_selected = false;
        if let Some(range) = app.selected.and_then(|k| layout.spans.get(&k)) {
            if range.start < app.chat_scroll {
                app.chat_scroll = range.start;
            } else if range.end > app.chat_scroll + height {
                app.chat_scroll = range.end.saturating_sub(height).min(range.start);
            }
        }
    }
    app.chat_scroll = app.chat_scroll.min(max_scroll);

    if layout.lines.is_empty() {
        let hint = Line::from(Span::styled(
            "No messages yet. Ask something about the project.",
            Style::default().fg(app.theme.text_muted),
        ));
        Paragraph::new(hint).render(inner, buf);
        return;
    }

    let visible: Vec<Line<'static>> = layout
        .lines
        .into_iter()
        .skip(app.chat_scroll)
        .take(height)
        .collect();
    Paragraph::new(visible).render(inner, buf);
}

pub fn build_layout(app: &App, width: usize) -> ChatLayout {
    let mut lines = Vec::new();
    let mut spans = HashMap::new();
    let theme = &app.theme;

    for msg in app.chat.store().iter() {
        let start = lines.len();
        let selected = app.selected == Some(msg.key);
        let mut body: Vec<Line<'static>> = Vec::new();
        body.push(header_line(app, msg, selected));
        body.extend(message_body(app, msg, selected));

        for line in body {
            let line = if selected {
                line.patch_style(Style::default().bg(theme.background_element))
            } else {
                line
            };
            lines.extend(wrap_line(line, width));
        }
        spans.insert(msg.key, start..lines.len());
        lines.push(Line::default());
    }

    if app.chat.is_sending() {
        lines.push(Line::from(Span::styled(
            "Model is thinking...",
            Style::default()
                .fg(theme.text_muted)
                .add_modifier(Modifier::ITALIC),
        )));
    }
    if app.chat.is_resetting() {
        lines.push(Line::from(Span::styled(
            "Resetting chat...",
            Style::default()
                .fg(theme.text_muted)
                .add_modifier(Modifier::ITALIC),
        )));
    }

    ChatLayout { lines, spans }
}

fn role_style(theme: &ThemeColors, msg: &ChatMessage) -> Style {
    let color = match (msg.kind, msg.role) {
        (MessageKind::LocalError, _) => theme.error,
        (_, Role::User) => theme.secondary,
        (_, Role::Model) => theme.primary,
        (_, Role::Other) => theme.text_muted,
    };
    Style::default().fg(color).add_modifier(Modifier::BOLD)
}

fn header_line(app: &App, msg: &ChatMessage, selected: bool) -> Line<'static> {
    let theme = &app.theme;
    let muted = Style::default().fg(theme.text_muted);
    let mut spans = vec![
        Span::styled(if selected { "▌ " } else { "  " }, role_style(theme, msg)),
        Span::styled(msg.role.label().to_string(), role_style(theme, msg)),
    ];

    if let Some(branch) = app.chat.store().branch_for(msg.key) {
        if branch.total_siblings > 1 {
            spans.push(Span::styled(
                format!("  < {}/{} >", branch.current_index + 1, branch.total_siblings),
                Style::default().fg(theme.accent),
            ));
        }
    }

    let tag = match app.chat.op(msg.key) {
        Some(MessageOp::Editing(_)) => Some("editing"),
        Some(MessageOp::Saving(_)) => Some("saving..."),
        Some(MessageOp::Regenerating) => Some("regenerating..."),
        Some(MessageOp::Hiding { .. }) => Some("updating..."),
        None if msg.kind == MessageKind::Pending => Some("sending..."),
        None => None,
    };
    if let Some(tag) = tag {
        spans.push(Span::styled(format!("  [{tag}]"), Style::default().fg(theme.warning)));
    }
    if msg.hidden {
        spans.push(Span::styled("  (hidden)", muted));
    }

    if selected && !app.chat.is_local_error(msg.key) && msg.id.is_some() {
        let mut hints = vec![
            (Action::EditMessage, "Edit"),
            (Action::HideMessage, hide_label(msg.hidden)),
        ];
        if msg.role == Role::Model {
            hints.push((Action::Regenerate, "Regenerate"));
        }
        spans.push(Span::raw("   "));
        for (action, label) in hints {
            if let Some(binding) = app.keymap.key_for(action) {
                spans.push(Span::styled(
                    format!("{} ", binding.display()),
                    Style::default().fg(theme.accent),
                ));
                spans.push(Span::styled(format!("{label}  "), muted));
            }
        }
    }
    Line::from(spans)
}

fn message_body(app: &App, msg: &ChatMessage, selected: bool) -> Vec<Line<'static>> {
    let theme = &app.theme;
    match app.chat.op(msg.key) {
        Some(MessageOp::Regenerating) => {
            return vec![Line::from(Span::styled(
                "  Regenerating...",
                Style::default()
                    .fg(theme.text_muted)
                    .add_modifier(Modifier::ITALIC),
            ))];
        }
        Some(MessageOp::Editing(draft)) | Some(MessageOp::Saving(draft)) => {
            let area = app
                .editing
                .as_ref()
                .filter(|(k, _)| *k == msg.key)
                .map(|(_, a)| a);
            return draft_lines(app, &draft.text, area, draft.create_new_branch);
        }
        _ => {}
    }

    if msg.kind == MessageKind::LocalError {
        return vec![Line::from(Span::styled(
            format!("  {}", msg.content),
            Style::default().fg(theme.error),
        ))];
    }

    let Some(cached) = app.renders.get(&msg.key) else {
        return msg
            .content
            .lines()
            .map(|l| Line::from(format!("  {l}")))
            .collect();
    };
    let rendered = &cached.rendered;
    let mut lines: Vec<Line<'static>> = rendered
        .lines
        .iter()
        .map(|l| {
            let mut spans = vec![Span::raw("  ")];
            spans.extend(l.spans.iter().cloned());
            Line::from(spans)
        })
        .collect();

    for (i, block) in rendered.code_blocks.iter().enumerate() {
        let Some(line) = lines.get_mut(block.line) else {
            continue;
        };
        let block_ref = BlockRef {
            message: msg.key,
            block: i,
        };
        if let Some(flash) = app.flashes.get(&block_ref) {
            let color = match flash.outcome {
                crate::render::actions::ActionOutcome::Failed => theme.error,
                _ => theme.success,
            };
            line.spans.push(Span::styled(
                format!("  {}", flash.outcome.icon()),
                Style::default().fg(color),
            ));
        } else if selected && app.selected_block == Some(i) {
            let key = |action| {
                app.keymap
                    .key_for(action)
                    .map(|b| b.display())
                    .unwrap_or_default()
            };
            line.spans.push(Span::styled(
                format!(
                    "  ◂ {} copy · {} apply",
                    key(Action::CopyCode),
                    key(Action::ApplyCode)
                ),
                Style::default().fg(theme.accent),
            ));
        }
    }
    if selected {
        if let Some(link) = app.selected_link.and_then(|i| rendered.links.get(i)) {
            if let Some(line) = lines.get_mut(link.line) {
                line.spans.push(Span::styled(
                    format!("  ◂ {}", link.path),
                    Style::default().fg(theme.link),
                ));
            }
        }
    }

    if msg.hidden {
        lines = lines
            .into_iter()
            .map(|l| l.patch_style(Style::default().fg(theme.text_muted)))
            .collect();
    }
    lines
}

/// Raw draft text with a block cursor, then the branch flag and key hints.
fn draft_lines(
    app: &App,
    text: &str,
    area: Option<&TextArea>,
    create_new_branch: bool,
) -> Vec<Line<'static>> {
    let theme = &app.theme;
    let text_style = Style::default().fg(theme.text).bg(theme.code_background);
    let cursor_style = Style::default().fg(theme.background).bg(theme.text);
    let mut lines = Vec::new();

    match area {
        Some(area) => {
            for (row, content) in area.lines.iter().enumerate() {
                if row != area.cursor_row {
                    lines.push(Line::from(vec![
                        Span::raw("  "),
                        Span::styled(content.clone(), text_style),
                    ]));
                    continue;
                }
                let col = area.cursor_col.min(content.len());
                let before = content[..col].to_string();
                let cursor = content[col..].chars().next();
                let after_start = col + cursor.map_or(0, char::len_utf8);
                lines.push(Line::from(vec![
                    Span::raw("  "),
                    Span::styled(before, text_style),
                    Span::styled(cursor.map_or(" ".to_string(), String::from), cursor_style),
                    Span::styled(content[after_start..].to_string(), text_style),
                ]));
            }
        }
        None => {
            for content in text.split('\n') {
                lines.push(Line::from(vec![
                    Span::raw("  "),
                    Span::styled(content.to_string(), text_style),
                ]));
            }
        }
    }

    let check = if create_new_branch { "[x]" } else { "[ ]" };
    let hints = app
        .keymap
        .draft_hints()
        .map(|b| format!("{} {}", b.display(), b.label.to_lowercase()))
        .collect::<Vec<_>>()
        .join(" · ");
    lines.push(Line::from(vec![
        Span::styled(format!("  {check} create new branch"), Style::default().fg(theme.accent)),
        Span::styled(format!("   {hints}"), Style::default().fg(theme.text_muted)),
    ]));
    lines
}

/// Split a styled line into rows no wider than `width` cells.
pub fn wrap_line(line: Line<'static>, width: usize) -> Vec<Line<'static>> {
    if width == 0 || line.width() <= width {
        return vec![line];
    }
    let line_style = line.style;
    let mut rows: Vec<Line<'static>> = Vec::new();
    let mut current: Vec<Span<'static>> = Vec::new();
    let mut used = 0;

    for span in line.spans {
        let style = span.style;
        let mut chunk = String::new();
        for c in span.content.chars() {
            let mut tmp = [0u8; 4];
            let w = Span::raw(&*c.encode_utf8(&mut tmp)).width();
            if used + w > width && used > 0 {
                if !chunk.is_empty() {
                    current.push(Span::styled(std::mem::take(&mut chunk), style));
                }
                rows.push(Line::from(std::mem::take(&mut current)).style(line_style));
                used = 0;
            }
            chunk.push(c);
            used += w;
        }
        if !chunk.is_empty() {
            current.push(Span::styled(chunk, style));
        }
    }
    if !current.is_empty() {
        rows.push(Line::from(current).style(line_style));
    }
    rows
}
