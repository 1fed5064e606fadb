//! Interactive pager: the note on top, its backlinks panel underneath.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::{execute, ExecutableCommand};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::prelude::{Color, Rect, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::block::Padding;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use tracing::{debug, info, warn};

use crate::block::FileId;
use crate::component::LinkClick;
use crate::host::{
    ChannelNavigator, LinkKind, RenderedLine, RichText, SectionKind, Settings, SharedSettings,
    ViewContext,
};
use crate::manager::{CoalesceManager, Collaborators};
use crate::render::TerminalMarkdownRenderer;
use crate::surface::{TerminalNoteView, TerminalSurface};
use crate::vault::{is_note_path, Vault};

/// A note as read from disk or stdin.
#[derive(Clone, Debug)]
pub struct Note {
    pub path: Option<PathBuf>,
    /// Vault id; `None` for stdin or files outside the vault.
    pub file: Option<FileId>,
    pub source: String,
}

impl Note {
    pub fn load(vault: &Vault, path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            file: vault.file_id(path),
            source,
        })
    }

    pub fn context(&self) -> ViewContext {
        let note = self.file.clone().unwrap_or_else(|| {
            let name = self
                .path
                .as_deref()
                .and_then(Path::file_name)
                .map_or_else(|| "<stdin>".to_string(), |name| name.to_string_lossy().into_owned());
            FileId::new(name)
        });
        ViewContext { note }
    }

    fn label(&self) -> String {
        match (&self.file, &self.path) {
            (Some(file), _) => file.to_string(),
            (None, Some(path)) => path.display().to_string(),
            (None, None) => "<stdin>".to_string(),
        }
    }
}

/// Starts the backlinks pipeline for `note`, or drops the panel when the note
/// has no place in the vault.
pub fn open_backlinks(
    manager: &mut CoalesceManager<TerminalSurface>,
    note: &Note,
) -> Option<String> {
    let Some(file) = note.file.as_ref() else {
        manager.clear_backlinks();
        return None;
    };
    let mut view = TerminalNoteView::new(file.clone());
    match manager.handle_file_open(file, &mut view) {
        Ok(()) => None,
        Err(err) => Some(err.to_string()),
    }
}

pub fn collaborators(
    vault: Arc<Vault>,
    settings: Arc<SharedSettings>,
    renderer: Arc<TerminalMarkdownRenderer>,
    navigator: Arc<ChannelNavigator>,
) -> Collaborators {
    Collaborators {
        settings,
        link_graph: vault.clone(),
        files: vault,
        renderer,
        navigator,
    }
}

fn system_open<S: AsRef<OsStr>>(arg: S) -> Result<()> {
    #[cfg(target_os = "macos")]
    let status = Command::new("open").arg(arg).status()?;

    #[cfg(all(unix, not(target_os = "macos")))]
    let status = Command::new("xdg-open").arg(arg).status()?;

    #[cfg(target_os = "windows")]
    let status = Command::new("cmd")
        .args(["/C", "start", ""])
        .arg(arg)
        .status()?;

    if !status.success() {
        return Err(anyhow!("system open command failed with status {status}"));
    }
    Ok(())
}

fn inset_rect(area: Rect, horizontal: u16) -> Rect {
    Rect {
        x: area.x.saturating_add(horizontal),
        y: area.y,
        width: area.width.saturating_sub(horizontal.saturating_mul(2)),
        height: area.height,
    }
}

fn usize_to_u16_saturating(value: usize) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}

enum LinkAction {
    Note(PathBuf),
    ExternalUrl(String),
    ExternalPath(PathBuf),
    Anchor(String),
    Unknown(String),
}

fn classify_link(target: &str, current_doc: Option<&Path>) -> LinkAction {
    if target.starts_with("http://") || target.starts_with("https://") {
        return LinkAction::ExternalUrl(target.to_string());
    }
    let path_part = target.split_once('#').map_or(target, |(path, _)| path);
    if path_part.is_empty() {
        return LinkAction::Anchor(target.to_string());
    }

    let path = PathBuf::from(path_part);
    let resolved = match current_doc.and_then(Path::parent) {
        Some(parent) if !path.is_absolute() => parent.join(path),
        _ => path,
    };
    if is_note_path(&resolved) {
        return LinkAction::Note(resolved);
    }
    if resolved.exists() {
        return LinkAction::ExternalPath(resolved);
    }
    LinkAction::Unknown(target.to_string())
}

struct HistoryEntry {
    path: PathBuf,
    scroll: u16,
}

struct FileWatcher {
    _watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
}

pub struct App {
    vault: Arc<Vault>,
    settings: Arc<SharedSettings>,
    renderer: Arc<TerminalMarkdownRenderer>,
    manager: CoalesceManager<TerminalSurface>,
    nav_rx: Receiver<FileId>,
    watch: bool,

    note: Note,
    rendered: RichText,

    scroll: u16,
    viewport_height: u16,
    selected_link: Option<usize>,
    backlink_focus: Option<usize>,
    backstack: Vec<HistoryEntry>,
    status: String,

    watcher: Option<FileWatcher>,
    watch_requested: bool,
}

impl App {
    pub fn new(
        vault: Arc<Vault>,
        settings: Arc<SharedSettings>,
        renderer: Arc<TerminalMarkdownRenderer>,
        note: Note,
        watch: bool,
    ) -> Self {
        let (nav_tx, nav_rx) = mpsc::channel();
        let navigator = Arc::new(ChannelNavigator::new(nav_tx));
        let manager = CoalesceManager::new(collaborators(
            vault.clone(),
            settings.clone(),
            renderer.clone(),
            navigator,
        ));
        let mut app = Self {
            vault,
            settings,
            renderer,
            manager,
            nav_rx,
            watch,
            note: Note {
                path: None,
                file: None,
                source: String::new(),
            },
            rendered: RichText::default(),
            scroll: 0,
            viewport_height: 1,
            selected_link: None,
            backlink_focus: None,
            backstack: Vec::new(),
            status: String::new(),
            watcher: None,
            watch_requested: false,
        };
        app.show_note(note, false);
        app
    }

    /// Renders `note` and hands it to the manager, which replaces the panel.
    fn show_note(&mut self, note: Note, preserve_scroll: bool) {
        self.rendered = self.renderer.render_text(&note.source, &note.context());
        self.note = note;
        self.selected_link = if self.rendered.links.is_empty() {
            None
        } else {
            Some(0)
        };
        self.backlink_focus = None;
        if !preserve_scroll {
            self.scroll = 0;
        }
        self.clamp_scroll();
        if let Some(message) = open_backlinks(&mut self.manager, &self.note) {
            self.status = message;
        }
    }

    fn panel_surface(&self) -> Option<&TerminalSurface> {
        self.manager.panel().map(|panel| panel.surface())
    }

    fn backlink_count(&self) -> usize {
        self.manager
            .panel()
            .map_or(0, |panel| panel.components().len())
    }

    /// Line where the panel starts, counting the blank spacer.
    fn panel_start(&self) -> usize {
        self.rendered.lines.len() + 1
    }

    fn total_lines(&self) -> usize {
        match self.panel_surface() {
            Some(surface) => self.panel_start() + surface.lines().len(),
            None => self.rendered.lines.len(),
        }
    }

    fn max_scroll(&self) -> u16 {
        let visible = self.viewport_height.max(1) as usize;
        usize_to_u16_saturating(self.total_lines().saturating_sub(visible))
    }

    fn set_scroll(&mut self, scroll: u16) {
        self.scroll = scroll.min(self.max_scroll());
    }

    fn set_scroll_to_line(&mut self, line: usize) {
        self.set_scroll(usize_to_u16_saturating(line));
    }

    fn clamp_scroll(&mut self) {
        self.scroll = self.scroll.min(self.max_scroll());
    }

    fn selected_link_line(&self) -> Option<usize> {
        self.selected_link
            .and_then(|idx| self.rendered.links.get(idx))
            .map(|link| link.line)
    }

    /// Absolute line of the focused backlink's header.
    fn focused_header_line(&self) -> Option<usize> {
        let panel = self.manager.panel()?;
        let header = panel.components().get(self.backlink_focus?)?.header()?;
        let offset = panel.surface().offset_of(header)?;
        Some(self.panel_start() + offset)
    }

    fn cycle_link(&mut self, reverse: bool) {
        let len = self.rendered.links.len();
        if len == 0 {
            self.selected_link = None;
            return;
        }
        self.backlink_focus = None;
        let idx = self.selected_link.unwrap_or(0);
        let next = if reverse {
            idx.checked_sub(1).unwrap_or(len - 1)
        } else {
            (idx + 1) % len
        };
        self.selected_link = Some(next);
        if let Some(line) = self.selected_link_line() {
            self.set_scroll_to_line(line);
        }
    }

    fn cycle_backlink(&mut self, reverse: bool) {
        let len = self.backlink_count();
        if len == 0 {
            self.backlink_focus = None;
            self.status = "No backlinks".to_string();
            return;
        }
        let next = match (self.backlink_focus, reverse) {
            (None, false) => 0,
            (None, true) => len - 1,
            (Some(idx), false) => (idx + 1) % len,
            (Some(idx), true) => idx.checked_sub(1).unwrap_or(len - 1),
        };
        self.backlink_focus = Some(next);
        if let Some(line) = self.focused_header_line() {
            self.set_scroll_to_line(line);
        }
    }

    fn toggle_focused(&mut self) {
        let Some(idx) = self.backlink_focus else {
            self.status = "No backlink focused".to_string();
            return;
        };
        if let Some(panel) = self.manager.panel_mut() {
            panel.toggle(idx);
        }
        self.clamp_scroll();
    }

    fn activate_focused(&mut self, idx: usize) {
        let click = self
            .manager
            .panel()
            .map_or(LinkClick::Ignored, |panel| panel.activate(idx));
        if click == LinkClick::Ignored {
            self.status = "Backlinks are still loading".to_string();
        }
    }

    fn cycle_strategy(&mut self) {
        let kind = self.settings.current_boundary_strategy_kind().next();
        self.settings.set_boundary_strategy_kind(kind);
        info!(strategy = %kind, "boundary strategy changed");
        self.backlink_focus = None;
        self.status = format!("Strategy: {kind}");
        if let Some(message) = open_backlinks(&mut self.manager, &self.note) {
            self.status = message;
        }
    }

    fn open_path(&mut self, path: &Path) -> Result<()> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let note = Note::load(&self.vault, &canonical)?;
        if let Some(current) = self.note.path.clone() {
            self.backstack.push(HistoryEntry {
                path: current,
                scroll: self.scroll,
            });
        }
        self.status = format!("Opened {}", note.label());
        self.show_note(note, false);
        self.ensure_watcher()?;
        Ok(())
    }

    fn open_selected_link(&mut self, force_external: bool) -> Result<()> {
        let Some(link) = self
            .selected_link
            .and_then(|idx| self.rendered.links.get(idx))
            .cloned()
        else {
            self.status = "No link selected".to_string();
            return Ok(());
        };

        if link.kind == LinkKind::Wiki {
            return match self.vault.resolve_note(&link.target) {
                Some(file) => self.open_path(&self.vault.path_of(&file)),
                None => {
                    self.status = format!("No note named {}", link.target);
                    Ok(())
                }
            };
        }

        match (force_external, classify_link(&link.target, self.note.path.as_deref())) {
            (_, LinkAction::Anchor(anchor)) => {
                self.status = format!("Anchor links not yet implemented: {anchor}");
            }
            (false, LinkAction::Note(path)) => self.open_path(&path)?,
            (true, LinkAction::Note(path)) | (_, LinkAction::ExternalPath(path)) => {
                system_open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
                self.status = format!("Opened {}", path.display());
            }
            (_, LinkAction::ExternalUrl(raw)) | (_, LinkAction::Unknown(raw)) => {
                system_open(&raw).with_context(|| format!("Failed to open {raw}"))?;
                self.status = format!("Opened {raw}");
            }
        }
        Ok(())
    }

    fn go_back(&mut self) -> Result<()> {
        let Some(entry) = self.backstack.pop() else {
            self.status = "Backstack is empty".to_string();
            return Ok(());
        };
        let note = Note::load(&self.vault, &entry.path)?;
        self.status = format!("Returned to {}", note.label());
        self.show_note(note, false);
        self.set_scroll(entry.scroll);
        self.ensure_watcher()?;
        Ok(())
    }

    /// Re-reads the note after the vault changed on disk.
    fn reload_current(&mut self) -> Result<()> {
        let Some(path) = self.note.path.clone() else {
            return Ok(());
        };
        self.vault.refresh();
        let note = Note::load(&self.vault, &path)
            .with_context(|| format!("Failed to reload {}", path.display()))?;
        self.status = format!("Reloaded {}", note.label());
        self.show_note(note, true);
        Ok(())
    }

    fn ensure_watcher(&mut self) -> Result<()> {
        if !self.watch || self.note.path.is_none() {
            self.watcher = None;
            return Ok(());
        }
        if self.watcher.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        watcher.watch(self.vault.root(), RecursiveMode::Recursive)?;
        debug!(root = %self.vault.root().display(), "watching vault");
        self.watcher = Some(FileWatcher {
            _watcher: watcher,
            rx,
        });
        Ok(())
    }

    fn poll_watch(&mut self) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        while let Ok(event) = watcher.rx.try_recv() {
            match event {
                Ok(event) if !matches!(event.kind, EventKind::Access(_)) => {
                    if event.paths.iter().any(|path| is_note_path(path)) {
                        self.watch_requested = true;
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "watch error"),
            }
        }
    }

    fn poll_navigation(&mut self) -> Result<()> {
        while let Ok(file) = self.nav_rx.try_recv() {
            let path = self.vault.path_of(&file);
            self.open_path(&path)?;
        }
        Ok(())
    }

    fn poll_backlinks(&mut self) {
        if self.manager.poll() {
            let count = self.backlink_count();
            if self.backlink_focus.is_some_and(|idx| idx >= count) {
                self.backlink_focus = None;
            }
            self.clamp_scroll();
        }
    }

    fn draw(&mut self, frame: &mut ratatui::Frame<'_>) {
        let root = inset_rect(frame.size(), 1);
        let chunks = Layout::vertical([Constraint::Min(1), Constraint::Length(1)]).split(root);
        let body = chunks[0];
        let status = inset_rect(chunks[1], 1);

        self.viewport_height = body.height.saturating_sub(1).max(1);
        self.clamp_scroll();
        self.draw_content(frame, body);
        self.draw_status(frame, status);
    }

    fn draw_content(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let highlight = Style::default().bg(Color::Blue).fg(Color::White);
        let selected_link_line = if self.backlink_focus.is_none() {
            self.selected_link_line()
        } else {
            None
        };

        let mut lines: Vec<Line> = self
            .rendered
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| {
                let style = (selected_link_line == Some(idx)).then_some(highlight);
                styled_line(line, "", style)
            })
            .collect();

        if let Some(surface) = self.panel_surface() {
            let focused = self.focused_header_line();
            lines.push(Line::raw(""));
            let start = lines.len();
            for (offset, entry) in surface.lines().into_iter().enumerate() {
                let indent = if entry.kind == SectionKind::BlockContent {
                    "    "
                } else {
                    ""
                };
                let style = (focused == Some(start + offset)).then_some(highlight);
                lines.push(styled_line(entry.line, indent, style));
            }
        }

        let paragraph = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .title(" coalesce ")
                    .borders(Borders::TOP)
                    .border_style(Style::default().fg(Color::DarkGray))
                    .padding(Padding::new(1, 1, 0, 0)),
            )
            .scroll((self.scroll, 0))
            .wrap(Wrap { trim: false });

        frame.render_widget(paragraph, area);
    }

    fn draw_status(&self, frame: &mut ratatui::Frame<'_>, area: Rect) {
        let focus_hint = match (self.backlink_focus, self.manager.panel()) {
            (Some(idx), Some(panel)) => panel.components().get(idx).map(|component| {
                format!(
                    "backlink[{}/{}]: {}",
                    idx + 1,
                    panel.components().len(),
                    component.source().display_name()
                )
            }),
            _ => None,
        };
        let hint = focus_hint.unwrap_or_else(|| {
            self.selected_link
                .and_then(|idx| self.rendered.links.get(idx).map(|link| (idx, link)))
                .map_or_else(
                    || "link: none".to_string(),
                    |(idx, link)| {
                        let total = self.rendered.links.len();
                        format!("link[{}/{total}]: {}", idx + 1, link.label)
                    },
                )
        });

        let strategy = self.settings.current_boundary_strategy_kind();
        let watch_hint = if self.watch { " watch:on" } else { "" };
        let mut status_text = format!("{} | {hint} | {strategy}{watch_hint}", self.note.label());
        if !self.status.is_empty() {
            status_text.push_str(" | ");
            status_text.push_str(&self.status);
        }

        frame.render_widget(
            Paragraph::new(format!(" {status_text}")).style(Style::default().fg(Color::Gray)),
            area,
        );
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.set_scroll(self.scroll.saturating_add(1)),
            KeyCode::Char('k') | KeyCode::Up => self.set_scroll(self.scroll.saturating_sub(1)),
            KeyCode::Char('g') => self.set_scroll(0),
            KeyCode::Char('G') => self.set_scroll(self.max_scroll()),
            KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                let delta = self.viewport_height.saturating_div(2).max(1);
                self.set_scroll(self.scroll.saturating_add(delta));
            }
            KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                let delta = self.viewport_height.saturating_div(2).max(1);
                self.set_scroll(self.scroll.saturating_sub(delta));
            }
            KeyCode::Tab => self.cycle_link(false),
            KeyCode::BackTab => self.cycle_link(true),
            KeyCode::Char('b') => self.cycle_backlink(false),
            KeyCode::Char('B') => self.cycle_backlink(true),
            KeyCode::Esc => self.backlink_focus = None,
            KeyCode::Char(' ') => self.toggle_focused(),
            KeyCode::Enter => match self.backlink_focus {
                Some(idx) => self.activate_focused(idx),
                None => self.open_selected_link(false)?,
            },
            KeyCode::Char('o') => self.open_selected_link(true)?,
            KeyCode::Char('s') => self.cycle_strategy(),
            KeyCode::Backspace => self.go_back()?,
            _ => {}
        }
        Ok(false)
    }
}

fn styled_line(line: &RenderedLine, indent: &str, highlight: Option<Style>) -> Line<'static> {
    let mut spans = Vec::with_capacity(line.segments.len() + 1);
    if !indent.is_empty() {
        spans.push(Span::raw(indent.to_string()));
    }
    for segment in &line.segments {
        let style = highlight.map_or(segment.style, |highlight| segment.style.patch(highlight));
        spans.push(Span::styled(segment.text.clone(), style));
    }
    if spans.is_empty() {
        spans.push(Span::raw(""));
    }
    Line::from(spans)
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        io::stdout().execute(EnterAlternateScreen)?;
        Ok(Self)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

pub fn run_interactive(mut app: App) -> Result<()> {
    let _guard = TerminalGuard::enter()?;
    app.ensure_watcher()?;

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    loop {
        app.poll_backlinks();
        terminal.draw(|frame| app.draw(frame))?;

        if app.watch_requested {
            if let Err(err) = app.reload_current() {
                app.status = format!("Reload failed: {err:#}");
            }
            app.watch_requested = false;
        }
        app.poll_watch();

        if let Err(err) = app.poll_navigation() {
            app.status = format!("{err:#}");
        }

        if event::poll(Duration::from_millis(120))? {
            match event::read()? {
                CEvent::Key(key) if key.kind == KeyEventKind::Press => {
                    match app.handle_key(key) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => app.status = format!("{err:#}"),
                    }
                }
                _ => {}
            }
        }
    }

    app.manager.clear_backlinks();
    Ok(())
}
