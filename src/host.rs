//! Interfaces the backlinks core consumes from its host application.
//!
//! The core never touches the filesystem, the terminal, or the note index
//! directly. Everything it needs is reached through these traits, which the
//! viewer implements in `vault`, `render` and `surface`, and which tests
//! replace with in-memory fakes.

use std::collections::BTreeMap;
use std::sync::{mpsc, Mutex};

use ratatui::style::Style;

use crate::block::FileId;
use crate::error::{ReadError, RenderError};
use crate::strategy::BoundaryStrategyKind;

/// Source note -> (target note -> number of links).
pub type ResolvedLinks = BTreeMap<FileId, BTreeMap<FileId, usize>>;

pub trait LinkGraph: Send + Sync {
    fn resolved_links(&self) -> ResolvedLinks;
}

/// Notes whose resolved outbound links include `target`, in link-graph order.
pub fn backlink_sources(graph: &dyn LinkGraph, target: &FileId) -> Vec<FileId> {
    graph
        .resolved_links()
        .into_iter()
        .filter(|(_, targets)| targets.contains_key(target))
        .map(|(source, _)| source)
        .collect()
}

pub trait FileAccess: Send + Sync {
    fn read(&self, file: &FileId) -> Result<String, ReadError>;
}

pub trait MarkdownRenderer: Send + Sync {
    fn render(
        &self,
        text: &str,
        source: &FileId,
        context: &ViewContext,
    ) -> Result<RichText, RenderError>;
}

/// Fire-and-forget request to open a note.
pub trait Navigator: Send + Sync {
    fn open_note(&self, file: &FileId);
}

/// Forwards navigation requests to whoever owns the receiving end.
pub struct ChannelNavigator {
    tx: Mutex<mpsc::Sender<FileId>>,
}

impl ChannelNavigator {
    pub fn new(tx: mpsc::Sender<FileId>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl Navigator for ChannelNavigator {
    fn open_note(&self, file: &FileId) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(file.clone());
        }
    }
}

pub trait Settings: Send + Sync {
    fn current_boundary_strategy_kind(&self) -> BoundaryStrategyKind;
}

/// Settings that can be changed at runtime; read once per note-open.
#[derive(Debug, Default)]
pub struct SharedSettings {
    strategy: Mutex<BoundaryStrategyKind>,
}

impl SharedSettings {
    pub fn new(strategy: BoundaryStrategyKind) -> Self {
        Self {
            strategy: Mutex::new(strategy),
        }
    }

    pub fn set_boundary_strategy_kind(&self, kind: BoundaryStrategyKind) {
        if let Ok(mut strategy) = self.strategy.lock() {
            *strategy = kind;
        }
    }
}

impl Settings for SharedSettings {
    fn current_boundary_strategy_kind(&self) -> BoundaryStrategyKind {
        self.strategy.lock().map(|kind| *kind).unwrap_or_default()
    }
}

/// What the host knows about the view a panel is attached to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewContext {
    pub note: FileId,
}

/// A note view that may offer a region for the backlinks panel.
pub trait HostView {
    type Surface: PresentationSink;

    fn context(&self) -> ViewContext;

    /// `None` when the view has nowhere to put a panel.
    fn attach_panel_region(&mut self) -> Option<Self::Surface>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionKind {
    PanelHeader,
    BlockHeader,
    BlockContent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SectionHandle(pub usize);

/// Toolkit-independent place the panel writes into.
pub trait PresentationSink {
    fn create_section(&mut self, kind: SectionKind) -> SectionHandle;

    fn set_content(&mut self, handle: SectionHandle, content: RichText);

    fn set_visible(&mut self, handle: SectionHandle, visible: bool);

    /// Drop every section but stay attached.
    fn clear(&mut self);

    /// Remove the region from its view.
    fn detach(&mut self);
}

#[derive(Clone, Debug, PartialEq)]
pub struct StyledSegment {
    pub text: String,
    pub style: Style,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderedLine {
    pub segments: Vec<StyledSegment>,
    pub plain: String,
}

impl RenderedLine {
    pub fn styled(text: impl Into<String>, style: Style) -> Self {
        let text = text.into();
        Self {
            plain: text.clone(),
            segments: vec![StyledSegment { text, style }],
        }
    }

    pub fn push(&mut self, text: &str, style: Style) {
        if text.is_empty() {
            return;
        }
        self.plain.push_str(text);
        self.segments.push(StyledSegment {
            text: text.to_string(),
            style,
        });
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkKind {
    Markdown,
    Wiki,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkRef {
    pub label: String,
    pub target: String,
    pub kind: LinkKind,
    pub line: usize,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RichText {
    pub lines: Vec<RenderedLine>,
    pub links: Vec<LinkRef>,
}

impl RichText {
    pub fn line(line: RenderedLine) -> Self {
        Self {
            lines: vec![line],
            links: Vec::new(),
        }
    }

    pub fn plain(&self) -> String {
        self.lines
            .iter()
            .map(|line| line.plain.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
