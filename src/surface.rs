use crate::block::FileId;
use crate::host::{
    HostView, PresentationSink, RenderedLine, RichText, SectionHandle, SectionKind, ViewContext,
};

#[derive(Clone, Debug)]
struct Section {
    kind: SectionKind,
    content: RichText,
    visible: bool,
}

/// Panel region drawn beneath the note in the pager.
#[derive(Clone, Debug, Default)]
pub struct TerminalSurface {
    sections: Vec<Section>,
    attached: bool,
}

/// One line of the panel, tagged with the section it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct SurfaceLine<'a> {
    pub section: SectionHandle,
    pub kind: SectionKind,
    pub line: &'a RenderedLine,
}

impl TerminalSurface {
    pub fn attached() -> Self {
        Self {
            sections: Vec::new(),
            attached: true,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Visible lines in section order. Nothing once detached.
    pub fn lines(&self) -> Vec<SurfaceLine<'_>> {
        if !self.attached {
            return Vec::new();
        }
        self.sections
            .iter()
            .enumerate()
            .filter(|(_, section)| section.visible)
            .flat_map(|(idx, section)| {
                section.content.lines.iter().map(move |line| SurfaceLine {
                    section: SectionHandle(idx),
                    kind: section.kind,
                    line,
                })
            })
            .collect()
    }

    pub fn plain_lines(&self) -> Vec<String> {
        self.lines()
            .into_iter()
            .map(|entry| match entry.kind {
                SectionKind::BlockContent => format!("    {}", entry.line.plain),
                _ => entry.line.plain.clone(),
            })
            .collect()
    }

    /// First visible line of `handle`, relative to the start of the panel.
    pub fn offset_of(&self, handle: SectionHandle) -> Option<usize> {
        self.lines().iter().position(|entry| entry.section == handle)
    }
}

impl PresentationSink for TerminalSurface {
    fn create_section(&mut self, kind: SectionKind) -> SectionHandle {
        self.sections.push(Section {
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
        self.sections.clear();
        self.attached = false;
    }
}

/// The pager's note view. Every note gets a fresh region below its text.
#[derive(Clone, Debug)]
pub struct TerminalNoteView {
    context: ViewContext,
}

impl TerminalNoteView {
    pub fn new(note: FileId) -> Self {
        Self {
            context: ViewContext { note },
        }
    }
}

impl HostView for TerminalNoteView {
    type Surface = TerminalSurface;

    fn context(&self) -> ViewContext {
        self.context.clone()
    }

    fn attach_panel_region(&mut self) -> Option<TerminalSurface> {
        Some(TerminalSurface::attached())
    }
}
