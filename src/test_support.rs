//! In-memory collaborators shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use ratatui::style::Style;

use crate::block::FileId;
use crate::error::{ReadError, RenderError};
use crate::host::{
    FileAccess, HostView, LinkGraph, MarkdownRenderer, Navigator, PresentationSink, RenderedLine,
    ResolvedLinks, RichText, SectionHandle, SectionKind, ViewContext,
};

pub struct StaticLinkGraph {
    links: Mutex<ResolvedLinks>,
}

impl StaticLinkGraph {
    pub fn new(edges: &[(&str, &[&str])]) -> Self {
        let graph = Self {
            links: Mutex::new(BTreeMap::new()),
        };
        for (source, targets) in edges {
            graph.link(source, targets);
        }
        graph
    }

    pub fn link(&self, source: &str, targets: &[&str]) {
        let mut links = self.links.lock().unwrap();
        let entry = links.entry(FileId::new(source)).or_default();
        for target in targets {
            *entry.entry(FileId::new(*target)).or_default() += 1;
        }
    }
}

impl LinkGraph for StaticLinkGraph {
    fn resolved_links(&self) -> ResolvedLinks {
        self.links.lock().unwrap().clone()
    }
}

/// One-shot latch a test opens to let blocked reads finish.
#[derive(Clone, Default)]
pub struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub fn open(&self) {
        let (open, cvar) = &*self.0;
        *open.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (open, cvar) = &*self.0;
        let mut guard = open.lock().unwrap();
        while !*guard {
            guard = cvar.wait(guard).unwrap();
        }
    }
}

#[derive(Default)]
pub struct MemoryFiles {
    contents: HashMap<FileId, String>,
    delays: HashMap<FileId, Duration>,
    gates: HashMap<FileId, Gate>,
    panics: Vec<FileId>,
    reads: Mutex<Vec<FileId>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, file: &str, content: &str) -> Self {
        self.contents.insert(FileId::new(file), content.to_string());
        self
    }

    pub fn delayed(mut self, file: &str, delay: Duration) -> Self {
        self.delays.insert(FileId::new(file), delay);
        self
    }

    pub fn gated(mut self, file: &str, gate: &Gate) -> Self {
        self.gates.insert(FileId::new(file), gate.clone());
        self
    }

    pub fn panicking(mut self, file: &str) -> Self {
        self.panics.push(FileId::new(file));
        self
    }

    pub fn reads(&self) -> Vec<FileId> {
        self.reads.lock().unwrap().clone()
    }

    /// Most reads that were running at the same moment.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl FileAccess for MemoryFiles {
    fn read(&self, file: &FileId) -> Result<String, ReadError> {
        self.reads.lock().unwrap().push(file.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _running = InFlight(&self.in_flight);
        if let Some(gate) = self.gates.get(file) {
            gate.wait();
        }
        if let Some(delay) = self.delays.get(file) {
            std::thread::sleep(*delay);
        }
        if self.panics.contains(file) {
            panic!("reader blew up on {file}");
        }
        self.contents
            .get(file)
            .cloned()
            .ok_or_else(|| ReadError::NotFound(file.clone()))
    }
}

/// Renders each source line verbatim; fails on text containing `!fail`.
pub struct PlainRenderer;

impl MarkdownRenderer for PlainRenderer {
    fn render(
        &self,
        text: &str,
        source: &FileId,
        _context: &ViewContext,
    ) -> Result<RichText, RenderError> {
        if text.contains("!fail") {
            return Err(RenderError {
                source_file: source.clone(),
                message: "refused".to_string(),
            });
        }
        Ok(RichText {
            lines: text
                .lines()
                .map(|line| RenderedLine::styled(line, Style::default()))
                .collect(),
            links: Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub opened: Mutex<Vec<FileId>>,
}

impl RecordingNavigator {
    pub fn opened(&self) -> Vec<FileId> {
        self.opened.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn open_note(&self, file: &FileId) {
        self.opened.lock().unwrap().push(file.clone());
    }
}

#[derive(Clone, Debug)]
pub struct RecordedSection {
    pub kind: SectionKind,
    pub content: RichText,
    pub visible: bool,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub sections: Vec<RecordedSection>,
    pub attached: bool,
    pub detach_calls: usize,
}

impl RecordingSink {
    pub fn attached() -> Self {
        Self {
            attached: true,
            ..Self::default()
        }
    }

    pub fn section(&self, handle: SectionHandle) -> &RecordedSection {
        &self.sections[handle.0]
    }

    pub fn texts_of(&self, kind: SectionKind) -> Vec<String> {
        self.sections
            .iter()
            .filter(|section| section.kind == kind)
            .map(|section| section.content.plain())
            .collect()
    }
}

impl PresentationSink for RecordingSink {
    fn create_section(&mut self, kind: SectionKind) -> SectionHandle {
        self.sections.push(RecordedSection {
            kind,
            content: RichText::default(),
            visible: true,
        });
        SectionHandle(self.sections.len() - 1)
    }

    fn set_content(&mut self, handle: SectionHandle, content: RichText) {
        if let Some(section) = self.sections.get_mut(handle.0) {
            section.content = content;
        }
    }

    fn set_visible(&mut self, handle: SectionHandle, visible: bool) {
        if let Some(section) = self.sections.get_mut(handle.0) {
            section.visible = visible;
        }
    }

    fn clear(&mut self) {
        self.sections.clear();
    }

    fn detach(&mut self) {
        self.detach_calls += 1;
        self.attached = false;
        self.sections.clear();
    }
}

pub struct TestView {
    pub note: FileId,
    pub has_region: bool,
}

impl TestView {
    pub fn new(note: &str) -> Self {
        Self {
            note: FileId::new(note),
            has_region: true,
        }
    }
}

impl HostView for TestView {
    type Surface = RecordingSink;

    fn context(&self) -> ViewContext {
        ViewContext {
            note: self.note.clone(),
        }
    }

    fn attach_panel_region(&mut self) -> Option<RecordingSink> {
        self.has_region.then(RecordingSink::attached)
    }
}
