//! Markdown to styled terminal lines.

use std::ops::Range;
use std::sync::OnceLock;

use pulldown_cmark::{
    Alignment, CodeBlockKind, Event as MdEvent, HeadingLevel, Options, Parser as MdParser, Tag,
    TagEnd,
};
use ratatui::style::{Color, Modifier, Style};
use regex::Regex;
use syntect::easy::HighlightLines;
use syntect::highlighting::{Theme, ThemeSet};
use syntect::parsing::SyntaxSet;
use syntect::util::LinesWithEndings;

use crate::block::FileId;
use crate::error::RenderError;
use crate::host::{
    LinkKind, LinkRef, MarkdownRenderer, RenderedLine, RichText, StyledSegment, ViewContext,
};

const RULE: &str = "────────────────────────────────────────────────────────────────";

fn wikilink_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\[\]|#]+)((?:#[^\[\]|]*)?)(?:\|([^\[\]]*))?\]\]").ok())
        .as_ref()
}

/// Renders markdown with pulldown-cmark, highlighting fenced code with syntect.
pub struct TerminalMarkdownRenderer {
    syntax_set: SyntaxSet,
    theme: Theme,
}

impl TerminalMarkdownRenderer {
    pub fn new() -> Self {
        let theme_set = ThemeSet::load_defaults();
        let theme = theme_set
            .themes
            .get("base16-ocean.dark")
            .or_else(|| theme_set.themes.values().next())
            .cloned()
            .unwrap_or_default();
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme,
        }
    }

    pub fn render_text(&self, source: &str, context: &ViewContext) -> RichText {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_SMART_PUNCTUATION);

        let mut writer = LineWriter::new(&self.syntax_set, &self.theme, context);
        for event in MdParser::new_ext(source, options) {
            match event {
                MdEvent::Start(tag) => writer.start(tag),
                MdEvent::End(tag) => writer.end(tag),
                MdEvent::Text(text) => writer.text(&text),
                MdEvent::Code(code) => writer.inline_code(&code),
                MdEvent::Html(html) | MdEvent::InlineHtml(html) => writer.text(&html),
                MdEvent::FootnoteReference(name) => writer.text(&format!("[^{name}]")),
                MdEvent::SoftBreak => writer.soft_break(),
                MdEvent::HardBreak => writer.hard_break(),
                MdEvent::Rule => writer.rule(),
                MdEvent::TaskListMarker(done) => writer.task_marker(done),
                _ => {}
            }
        }
        writer.finish()
    }
}

impl Default for TerminalMarkdownRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkdownRenderer for TerminalMarkdownRenderer {
    fn render(
        &self,
        text: &str,
        _source: &FileId,
        context: &ViewContext,
    ) -> Result<RichText, RenderError> {
        Ok(self.render_text(text, context))
    }
}

#[derive(Default)]
struct InlineState {
    emphasis: usize,
    strong: usize,
    strikethrough: usize,
    link_depth: usize,
}

impl InlineState {
    fn style(&self) -> Style {
        let mut style = Style::default();
        if self.emphasis > 0 {
            style = style.add_modifier(Modifier::ITALIC);
        }
        if self.strong > 0 {
            style = style.add_modifier(Modifier::BOLD);
        }
        if self.strikethrough > 0 {
            style = style.add_modifier(Modifier::CROSSED_OUT);
        }
        if self.link_depth > 0 {
            style = style.fg(Color::Cyan).add_modifier(Modifier::UNDERLINED);
        }
        style
    }
}

struct PendingLink {
    target: String,
    text: String,
}

#[derive(Default)]
struct TableState {
    in_head: bool,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    row: Vec<String>,
    cell: Option<String>,
    alignments: Vec<Alignment>,
}

struct LineWriter<'a> {
    syntax_set: &'a SyntaxSet,
    theme: &'a Theme,
    context: &'a ViewContext,

    lines: Vec<RenderedLine>,
    links: Vec<LinkRef>,
    current: RenderedLine,
    current_links: Vec<usize>,

    inline: InlineState,
    link: Option<PendingLink>,
    image_alt: Option<(String, String)>,
    heading: Option<u8>,
    quote_depth: usize,
    lists: Vec<Option<u64>>,
    code: Option<(String, String)>,
    table: Option<TableState>,
}

impl<'a> LineWriter<'a> {
    fn new(syntax_set: &'a SyntaxSet, theme: &'a Theme, context: &'a ViewContext) -> Self {
        Self {
            syntax_set,
            theme,
            context,
            lines: Vec::new(),
            links: Vec::new(),
            current: RenderedLine::default(),
            current_links: Vec::new(),
            inline: InlineState::default(),
            link: None,
            image_alt: None,
            heading: None,
            quote_depth: 0,
            lists: Vec::new(),
            code: None,
            table: None,
        }
    }

    fn finish(mut self) -> RichText {
        self.flush(false);
        while self.lines.last().is_some_and(|line| line.plain.is_empty()) {
            self.lines.pop();
        }
        if self.lines.is_empty() {
            self.lines.push(RenderedLine::default());
        }
        RichText {
            lines: self.lines,
            links: self.links,
        }
    }

    fn push(&mut self, text: &str, style: Style) {
        self.current.push(text, style);
    }

    fn push_prefix(&mut self) {
        if self.current.plain.is_empty() && self.quote_depth > 0 {
            let prefix = "> ".repeat(self.quote_depth);
            self.push(&prefix, Style::default().fg(Color::DarkGray));
        }
    }

    fn text_style(&self) -> Style {
        match self.heading {
            Some(1) => Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            Some(2) => Style::default()
                .fg(Color::LightMagenta)
                .add_modifier(Modifier::BOLD),
            Some(_) => Style::default().fg(Color::LightCyan).add_modifier(Modifier::BOLD),
            None => self.inline.style(),
        }
    }

    fn flush(&mut self, force_empty: bool) {
        if !force_empty && self.current.plain.is_empty() {
            return;
        }
        let line_index = self.lines.len();
        if self.code.is_none() {
            self.mark_wikilinks(line_index);
        }
        for idx in self.current_links.drain(..) {
            if let Some(link) = self.links.get_mut(idx) {
                link.line = line_index;
            }
        }
        self.lines.push(std::mem::take(&mut self.current));
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|line| line.plain.is_empty()) {
            return;
        }
        self.flush(true);
    }

    /// Records `[[...]]` links on the pending line and restyles them.
    fn mark_wikilinks(&mut self, line_index: usize) {
        let Some(re) = wikilink_re() else {
            return;
        };
        let found: Vec<(Range<usize>, String, String)> = re
            .captures_iter(&self.current.plain)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let target = caps.get(1)?.as_str().trim().to_string();
                let label = caps
                    .get(3)
                    .map(|alias| alias.as_str().trim())
                    .filter(|alias| !alias.is_empty())
                    .unwrap_or(target.as_str())
                    .to_string();
                Some((whole.range(), target, label))
            })
            .collect();

        let context = self.context;
        let current_note = context.note.note_name();
        for (range, target, label) in found {
            let points_here = FileId::new(target.as_str()).note_name() == current_note;
            let style = if points_here {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::Cyan).add_modifier(Modifier::UNDERLINED)
            };
            let segments = std::mem::take(&mut self.current.segments);
            self.current.segments = restyle(segments, range, style);
            self.links.push(LinkRef {
                label,
                target,
                kind: LinkKind::Wiki,
                line: line_index,
            });
        }
    }

    fn start(&mut self, tag: Tag<'_>) {
        if let Some(table) = self.table.as_mut() {
            match tag {
                Tag::TableHead => table.in_head = true,
                Tag::TableRow => table.row.clear(),
                Tag::TableCell => table.cell = Some(String::new()),
                _ => {}
            }
            return;
        }

        match tag {
            Tag::Heading { level, .. } => {
                self.flush(false);
                self.heading = Some(heading_level(level));
            }
            Tag::BlockQuote(_) => {
                self.flush(false);
                self.quote_depth += 1;
            }
            Tag::CodeBlock(kind) => {
                self.flush(false);
                let lang = match kind {
                    CodeBlockKind::Fenced(name) => name.to_string(),
                    CodeBlockKind::Indented => String::new(),
                };
                self.code = Some((lang, String::new()));
            }
            Tag::List(start) => self.lists.push(start),
            Tag::Item => {
                self.flush(false);
                let indent = "  ".repeat(self.lists.len().saturating_sub(1));
                let bullet = match self.lists.last_mut() {
                    Some(Some(next)) => {
                        let bullet = format!("{next}. ");
                        *next += 1;
                        bullet
                    }
                    _ => "- ".to_string(),
                };
                self.push_prefix();
                self.push(&format!("{indent}{bullet}"), Style::default().fg(Color::DarkGray));
            }
            Tag::Emphasis => self.inline.emphasis += 1,
            Tag::Strong => self.inline.strong += 1,
            Tag::Strikethrough => self.inline.strikethrough += 1,
            Tag::Link { dest_url, .. } => {
                self.inline.link_depth += 1;
                self.link = Some(PendingLink {
                    target: dest_url.to_string(),
                    text: String::new(),
                });
            }
            Tag::Image { dest_url, .. } => {
                self.image_alt = Some((dest_url.to_string(), String::new()));
            }
            Tag::Table(alignments) => {
                self.flush(false);
                self.table = Some(TableState {
                    alignments,
                    ..TableState::default()
                });
            }
            _ => {}
        }
    }

    fn end(&mut self, tag: TagEnd) {
        if let Some(table) = self.table.as_mut() {
            match tag {
                TagEnd::TableCell => {
                    if let Some(cell) = table.cell.take() {
                        table.row.push(cell.trim().to_string());
                    }
                }
                TagEnd::TableRow | TagEnd::TableHead => {
                    let row = std::mem::take(&mut table.row);
                    if table.in_head {
                        table.header = row;
                    } else if !row.is_empty() {
                        table.rows.push(row);
                    }
                    table.in_head = false;
                }
                TagEnd::Table => {
                    let table = self.table.take().unwrap_or_default();
                    self.write_table(&table);
                    self.blank_line();
                }
                _ => {}
            }
            return;
        }

        match tag {
            TagEnd::Paragraph => {
                self.flush(false);
                self.blank_line();
            }
            TagEnd::Heading(_) => {
                self.flush(false);
                self.heading = None;
                self.blank_line();
            }
            TagEnd::BlockQuote => {
                self.flush(false);
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.blank_line();
            }
            TagEnd::CodeBlock => {
                let (lang, code) = self.code.take().unwrap_or_default();
                self.write_code_block(&lang, &code);
                self.blank_line();
            }
            TagEnd::List(_) => {
                self.flush(false);
                self.lists.pop();
                if self.lists.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => self.flush(false),
            TagEnd::Emphasis => self.inline.emphasis = self.inline.emphasis.saturating_sub(1),
            TagEnd::Strong => self.inline.strong = self.inline.strong.saturating_sub(1),
            TagEnd::Strikethrough => {
                self.inline.strikethrough = self.inline.strikethrough.saturating_sub(1);
            }
            TagEnd::Link => {
                self.inline.link_depth = self.inline.link_depth.saturating_sub(1);
                if let Some(link) = self.link.take() {
                    let label = link.text.trim();
                    self.links.push(LinkRef {
                        label: if label.is_empty() {
                            link.target.clone()
                        } else {
                            label.to_string()
                        },
                        target: link.target,
                        kind: LinkKind::Markdown,
                        line: usize::MAX,
                    });
                    self.current_links.push(self.links.len() - 1);
                }
            }
            TagEnd::Image => {
                if let Some((target, alt)) = self.image_alt.take() {
                    let alt = if alt.trim().is_empty() { "image" } else { alt.trim() };
                    let label = format!("[image: {alt}] ({target})");
                    self.push(&label, Style::default().fg(Color::LightBlue));
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if let Some((_, code)) = self.code.as_mut() {
            code.push_str(text);
            return;
        }
        if let Some(cell) = self.table.as_mut().and_then(|table| table.cell.as_mut()) {
            cell.push_str(text);
            return;
        }
        if let Some((_, alt)) = self.image_alt.as_mut() {
            alt.push_str(text);
            return;
        }
        self.push_prefix();
        let style = self.text_style();
        self.push(text, style);
        if let Some(link) = self.link.as_mut() {
            link.text.push_str(text);
        }
    }

    fn soft_break(&mut self) {
        if let Some((_, code)) = self.code.as_mut() {
            code.push('\n');
            return;
        }
        if let Some(cell) = self.table.as_mut().and_then(|table| table.cell.as_mut()) {
            cell.push(' ');
            return;
        }
        // Source line breaks are kept.
        self.flush(false);
    }

    fn hard_break(&mut self) {
        if let Some((_, code)) = self.code.as_mut() {
            code.push('\n');
            return;
        }
        self.flush(false);
    }

    fn inline_code(&mut self, code: &str) {
        if let Some(cell) = self.table.as_mut().and_then(|table| table.cell.as_mut()) {
            cell.push_str(code);
            return;
        }
        self.push_prefix();
        self.push(
            code,
            Style::default().fg(Color::LightYellow).add_modifier(Modifier::BOLD),
        );
        if let Some(link) = self.link.as_mut() {
            link.text.push_str(code);
        }
    }

    fn rule(&mut self) {
        self.flush(false);
        self.push(RULE, Style::default().fg(Color::DarkGray));
        self.flush(false);
        self.blank_line();
    }

    fn task_marker(&mut self, done: bool) {
        self.push_prefix();
        let marker = if done { "[x] " } else { "[ ] " };
        self.push(marker, Style::default().fg(Color::DarkGray));
    }

    fn write_code_block(&mut self, lang: &str, code: &str) {
        let syntax_set = self.syntax_set;
        let syntax = syntax_set
            .find_syntax_by_token(lang.trim())
            .unwrap_or_else(|| syntax_set.find_syntax_plain_text());
        let mut highlighter = HighlightLines::new(syntax, self.theme);
        // Keep the code flag set while flushing so wikilinks inside code stay literal.
        self.code = Some((String::new(), String::new()));

        for line in LinesWithEndings::from(code) {
            let clean = line.trim_end_matches(['\n', '\r']);
            self.push("  ", Style::default().fg(Color::DarkGray));
            let tokens = highlighter
                .highlight_line(line, syntax_set)
                .unwrap_or_default();
            if tokens.is_empty() {
                self.push(clean, Style::default().fg(Color::LightGreen));
            }
            for (style, token) in tokens {
                let fg = style.foreground;
                let token = token.trim_end_matches(['\n', '\r']);
                self.push(token, Style::default().fg(Color::Rgb(fg.r, fg.g, fg.b)));
            }
            self.flush(true);
        }
        self.code = None;
    }

    fn write_table(&mut self, table: &TableState) {
        let rows: Vec<&Vec<String>> = std::iter::once(&table.header)
            .filter(|header| !header.is_empty())
            .chain(table.rows.iter())
            .collect();
        let columns = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        if columns == 0 {
            return;
        }
        let mut widths = vec![3usize; columns];
        for row in &rows {
            for (idx, cell) in row.iter().enumerate() {
                widths[idx] = widths[idx].max(cell.chars().count());
            }
        }

        for (row_idx, row) in rows.iter().enumerate() {
            let cells: Vec<String> = (0..columns)
                .map(|idx| row.get(idx).cloned().unwrap_or_default())
                .collect();
            let is_header = row_idx == 0 && !table.header.is_empty();
            let style = if is_header {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            self.push(&table_row(&cells, &widths), style);
            self.flush(false);
            if is_header {
                let separators: Vec<String> = widths
                    .iter()
                    .enumerate()
                    .map(|(idx, width)| {
                        let align = table.alignments.get(idx).copied().unwrap_or(Alignment::None);
                        separator(align, *width)
                    })
                    .collect();
                self.push(&table_row(&separators, &widths), Style::default().fg(Color::DarkGray));
                self.flush(false);
            }
        }
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn separator(align: Alignment, width: usize) -> String {
    match align {
        Alignment::Left => format!(":{}", "-".repeat(width.saturating_sub(1))),
        Alignment::Center if width > 1 => format!(":{}:", "-".repeat(width - 2)),
        Alignment::Center => ":".to_string(),
        Alignment::Right => format!("{}:", "-".repeat(width.saturating_sub(1))),
        Alignment::None => "-".repeat(width),
    }
}

fn table_row(cells: &[String], widths: &[usize]) -> String {
    let mut out = String::from("| ");
    for (cell, width) in cells.iter().zip(widths) {
        out.push_str(&format!("{cell:<width$} | "));
    }
    out
}

/// Applies `style` to the bytes of `range`, splitting segments at its edges.
fn restyle(segments: Vec<StyledSegment>, range: Range<usize>, style: Style) -> Vec<StyledSegment> {
    let mut out = Vec::with_capacity(segments.len() + 2);
    let mut offset = 0;
    for segment in segments {
        let start = offset;
        let end = offset + segment.text.len();
        offset = end;
        if end <= range.start || start >= range.end {
            out.push(segment);
            continue;
        }
        let cut_start = range.start.max(start) - start;
        let cut_end = range.end.min(end) - start;
        let pieces = [
            (&segment.text[..cut_start], segment.style),
            (&segment.text[cut_start..cut_end], style),
            (&segment.text[cut_end..], segment.style),
        ];
        for (text, style) in pieces {
            if !text.is_empty() {
                out.push(StyledSegment {
                    text: text.to_string(),
                    style,
                });
            }
        }
    }
    coalesce(out)
}

fn coalesce(segments: Vec<StyledSegment>) -> Vec<StyledSegment> {
    let mut out: Vec<StyledSegment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match out.last_mut() {
            Some(last) if last.style == segment.style => last.text.push_str(&segment.text),
            _ => out.push(segment),
        }
    }
    out
}
