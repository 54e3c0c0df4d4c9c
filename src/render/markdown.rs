use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};

use super::highlight::highlight_code;
use super::links::{editor_uri, find_paths, LinkContext};
use crate::theme::ThemeColors;

/// A fenced or indented code block found while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub language: Option<String>,
    pub code: String,
    /// Index of the block's header line in `RenderedMessage::lines`.
    pub line: usize,
}

/// A file path in prose or inline code, mapped to an editor URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLink {
    pub path: String,
    pub uri: String,
    pub line: usize,
}

/// Styled lines for one message plus what the view can act on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedMessage {
    pub lines: Vec<Line<'static>>,
    pub code_blocks: Vec<CodeBlock>,
    pub links: Vec<FileLink>,
}

/// Render markdown `content` into terminal lines.
pub fn render_markdown(content: &str, ctx: &LinkContext, theme: &ThemeColors) -> RenderedMessage {
    let options = Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS;
    let mut renderer = Renderer::new(ctx, theme);
    for event in Parser::new_ext(content, options) {
        renderer.handle(event);
    }
    renderer.finish()
}

struct Renderer<'a> {
    ctx: &'a LinkContext,
    theme: &'a ThemeColors,
    out: RenderedMessage,
    spans: Vec<Span<'static>>,
    styles: Vec<Style>,
    /// Open lists; `Some(n)` is the next number of an ordered list.
    lists: Vec<Option<u64>>,
    quote_depth: usize,
    code: Option<(Option<String>, String)>,
    link_targets: Vec<String>,
    cell_index: usize,
}

impl<'a> Renderer<'a> {
    fn new(ctx: &'a LinkContext, theme: &'a ThemeColors) -> Self {
        Self {
            ctx,
            theme,
            out: RenderedMessage::default(),
            spans: Vec::new(),
            styles: vec![Style::default().fg(theme.text)],
            lists: Vec::new(),
            quote_depth: 0,
            code: None,
            link_targets: Vec::new(),
            cell_index: 0,
        }
    }

    fn style(&self) -> Style {
        self.styles.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, patch: Style) {
        let next = self.style().patch(patch);
        self.styles.push(next);
    }

    fn pop_style(&mut self) {
        if self.styles.len() > 1 {
            self.styles.pop();
        }
    }

    fn muted(&self) -> Style {
        Style::default().fg(self.theme.text_muted)
    }

    fn flush_line(&mut self) {
        if self.spans.is_empty() {
            return;
        }
        let mut spans = Vec::with_capacity(self.spans.len() + 1);
        if self.quote_depth > 0 {
            spans.push(Span::styled("│ ".repeat(self.quote_depth), self.muted()));
        }
        spans.append(&mut self.spans);
        self.out.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        self.flush_line();
        let last_blank = self.out.lines.last().map_or(true, |l| l.spans.is_empty());
        if !last_blank {
            self.out.lines.push(Line::default());
        }
    }

    fn text(&mut self, text: &str, style: Style) {
        if !self.link_targets.is_empty() {
            self.spans.push(Span::styled(text.to_string(), style));
            return;
        }
        let link_style = style
            .fg(self.theme.link)
            .add_modifier(Modifier::UNDERLINED);
        let mut last = 0;
        for range in find_paths(text) {
            if range.start > last {
                self.spans
                    .push(Span::styled(text[last..range.start].to_string(), style));
            }
            let path = &text[range.clone()];
            self.out.links.push(FileLink {
                path: path.to_string(),
                uri: editor_uri(path, self.ctx),
                line: self.out.lines.len(),
            });
            self.spans.push(Span::styled(path.to_string(), link_style));
            last = range.end;
        }
        if last < text.len() {
            self.spans.push(Span::styled(text[last..].to_string(), style));
        }
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(tag) => self.start(tag),
            Event::End(tag) => self.end(tag),
            Event::Text(text) => {
                if let Some((_, buf)) = self.code.as_mut() {
                    buf.push_str(&text);
                } else {
                    let style = self.style();
                    self.text(&text, style);
                }
            }
            Event::Code(code) => {
                let style = self
                    .style()
                    .fg(self.theme.accent)
                    .bg(self.theme.background_element);
                self.text(&code, style);
            }
            Event::SoftBreak => self.spans.push(Span::raw(" ")),
            Event::HardBreak => self.flush_line(),
            Event::Rule => {
                self.flush_line();
                self.out
                    .lines
                    .push(Line::from(Span::styled("─".repeat(40), self.muted())));
                self.blank_line();
            }
            Event::Html(html) | Event::InlineHtml(html) => {
                for (i, part) in html.split('\n').enumerate() {
                    if i > 0 {
                        self.flush_line();
                    }
                    if !part.is_empty() {
                        self.spans.push(Span::styled(part.to_string(), self.muted()));
                    }
                }
            }
            Event::TaskListMarker(checked) => {
                let mark = if checked { "[x] " } else { "[ ] " };
                self.spans.push(Span::styled(mark, self.muted()));
            }
            _ => {}
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_line();
                let hashes = match level {
                    HeadingLevel::H1 => 1,
                    HeadingLevel::H2 => 2,
                    HeadingLevel::H3 => 3,
                    HeadingLevel::H4 => 4,
                    HeadingLevel::H5 => 5,
                    HeadingLevel::H6 => 6,
                };
                self.spans
                    .push(Span::styled(format!("{} ", "#".repeat(hashes)), self.muted()));
                self.push_style(
                    Style::default()
                        .fg(self.theme.primary)
                        .add_modifier(Modifier::BOLD),
                );
            }
            Tag::BlockQuote(_) => {
                self.flush_line();
                self.quote_depth += 1;
                self.push_style(Style::default().add_modifier(Modifier::ITALIC));
            }
            Tag::CodeBlock(kind) => {
                self.flush_line();
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string)
                        .filter(|l| !l.is_empty()),
                    CodeBlockKind::Indented => None,
                };
                self.code = Some((language, String::new()));
            }
            Tag::List(start) => {
                self.flush_line();
                self.lists.push(start);
            }
            Tag::Item => {
                self.flush_line();
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let marker = match self.lists.last_mut() {
                    Some(Some(n)) => {
                        let marker = format!("{indent}{n}. ");
                        *n += 1;
                        marker
                    }
                    _ => format!("{indent}• "),
                };
                self.spans
                    .push(Span::styled(marker, Style::default().fg(self.theme.secondary)));
            }
            Tag::Emphasis => self.push_style(Style::default().add_modifier(Modifier::ITALIC)),
            Tag::Strong => self.push_style(Style::default().add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => {
                self.push_style(Style::default().add_modifier(Modifier::CROSSED_OUT))
            }
            Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. } => {
                self.link_targets.push(dest_url.to_string());
                self.push_style(
                    Style::default()
                        .fg(self.theme.link)
                        .add_modifier(Modifier::UNDERLINED),
                );
            }
            Tag::Table(_) => self.flush_line(),
            Tag::TableHead | Tag::TableRow => self.cell_index = 0,
            Tag::TableCell => {
                if self.cell_index > 0 {
                    self.spans.push(Span::styled(" │ ", self.muted()));
                }
                self.cell_index += 1;
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                if self.lists.is_empty() {
                    self.blank_line();
                } else {
                    self.flush_line();
                }
            }
            TagEnd::Heading(_) => {
                self.pop_style();
                self.blank_line();
            }
            TagEnd::BlockQuote(_) => {
                self.flush_line();
                self.pop_style();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                if self.quote_depth == 0 {
                    self.blank_line();
                }
            }
            TagEnd::CodeBlock => self.finish_code_block(),
            TagEnd::List(_) => {
                self.flush_line();
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => self.flush_line(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.pop_style(),
            TagEnd::Link | TagEnd::Image => {
                self.pop_style();
                if let Some(target) = self.link_targets.pop() {
                    if !target.is_empty() && !target.starts_with('#') {
                        self.spans
                            .push(Span::styled(format!(" <{target}>"), self.muted()));
                    }
                }
            }
            TagEnd::TableHead => {
                self.flush_line();
                self.out
                    .lines
                    .push(Line::from(Span::styled("─".repeat(24), self.muted())));
            }
            TagEnd::TableRow => self.flush_line(),
            TagEnd::Table => self.blank_line(),
            _ => {}
        }
    }

    fn finish_code_block(&mut self) {
        let Some((language, code)) = self.code.take() else {
            return;
        };
        let muted = self.muted();
        let line = self.out.lines.len();
        let number = self.out.code_blocks.len() + 1;
        self.out.lines.push(Line::from(vec![
            Span::styled(
                format!("╭─ {} ", language.as_deref().unwrap_or("text")),
                muted,
            ),
            Span::styled(format!("[{number}]"), Style::default().fg(self.theme.accent)),
        ]));
        let fallback = Style::default().fg(self.theme.text);
        for highlighted in highlight_code(&code, language.as_deref(), fallback) {
            let mut spans = vec![Span::styled("│ ", muted)];
            spans.extend(highlighted.spans);
            self.out.lines.push(Line::from(spans));
        }
        self.out.lines.push(Line::from(Span::styled("╰─", muted)));
        self.blank_line();
        self.out.code_blocks.push(CodeBlock {
            language,
            code,
            line,
        });
    }

    fn finish(mut self) -> RenderedMessage {
        if let Some((language, code)) = self.code.take() {
            // Unterminated fence at the end of the message.
            self.code = Some((language, code));
            self.finish_code_block();
        }
        self.flush_line();
        while self.out.lines.last().is_some_and(|l| l.spans.is_empty()) {
            self.out.lines.pop();
        }
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(content: &str) -> RenderedMessage {
        let ctx = LinkContext {
            source_dir: Some("/home/u/proj".into()),
            scheme: "vscode".into(),
        };
        render_markdown(content, &ctx, &ThemeColors::default())
    }

    fn plain(line: &Line<'_>) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_heading_and_paragraph() {
        let out = render("# Title\n\nSome *text* here.");
        let texts: Vec<String> = out.lines.iter().map(plain).collect();
        assert_eq!(texts, vec!["# Title", "", "Some text here."]);
    }

    #[test]
    fn test_code_block_is_recorded() {
        let out = render("Intro\n\n```rust\n// src/main.rs\nfn main() {}\n```\n");
        assert_eq!(out.code_blocks.len(), 1);
        let block = &out.code_blocks[0];
        assert_eq!(block.language.as_deref(), Some("rust"));
        assert_eq!(block.code, "// src/main.rs\nfn main() {}\n");
        assert_eq!(plain(&out.lines[block.line]), "╭─ rust [1]");
        assert_eq!(plain(&out.lines[block.line + 2]), "│ fn main() {}");
        // Paths inside code blocks are not linked.
        assert!(out.links.is_empty());
    }

    #[test]
    fn test_paths_become_editor_links() {
        let out = render("Look at `src/lib/foo.rs` and docs/a.md.");
        assert_eq!(out.links.len(), 2);
        assert_eq!(out.links[0].path, "src/lib/foo.rs");
        assert_eq!(
            out.links[0].uri,
            "vscode://file/%2Fhome%2Fu%2Fproj%2Fsrc%2Flib%2Ffoo.rs"
        );
        assert_eq!(out.links[1].line, 0);
    }

    #[test]
    fn test_list_markers() {
        let out = render("1. one\n2. two\n\n- a\n- b");
        let texts: Vec<String> = out.lines.iter().map(plain).collect();
        assert_eq!(texts, vec!["1. one", "2. two", "", "• a", "• b"]);
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let content = "## Plan\n\n- edit `src/app.rs`\n\n```python\nprint('x')\n```";
        assert_eq!(render(content), render(content));
    }
}
