use std::sync::Arc;

use ratatui::style::{Color, Modifier, Style};
use tracing::warn;

use crate::aggregate::{BacklinkEntry, EntryContent};
use crate::block::FileId;
use crate::error::RenderError;
use crate::host::{
    MarkdownRenderer, Navigator, PresentationSink, RenderedLine, RichText, SectionHandle,
    SectionKind, ViewContext,
};

const EXPANDED_MARKER: &str = "▼";
const COLLAPSED_MARKER: &str = "▶";
const NOT_FOUND_TEXT: &str = "Current note name not found in file.";

/// What the host should do with the click that reached a label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkClick {
    /// Navigation intent was signalled; the host must not follow the link itself.
    DefaultPrevented,
    /// The component has not been rendered yet, so nothing was signalled.
    Ignored,
}

/// One collapsible backlink preview.
pub struct BlockComponent {
    entry: BacklinkEntry,
    expanded: bool,
    header: Option<SectionHandle>,
    content: Option<SectionHandle>,
    on_navigate: Option<Arc<dyn Navigator>>,
}

impl BlockComponent {
    pub fn new(entry: BacklinkEntry) -> Self {
        Self {
            entry,
            expanded: true,
            header: None,
            content: None,
            on_navigate: None,
        }
    }

    pub fn source(&self) -> &FileId {
        &self.entry.source
    }

    pub fn entry(&self) -> &BacklinkEntry {
        &self.entry
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn header(&self) -> Option<SectionHandle> {
        self.header
    }

    pub fn content(&self) -> Option<SectionHandle> {
        self.content
    }

    /// Writes the header and the block's content into `sink`.
    ///
    /// A renderer failure leaves a visible marker in the content section and is
    /// returned so the caller can report it; the header stays usable.
    pub fn render(
        &mut self,
        sink: &mut dyn PresentationSink,
        context: &ViewContext,
        renderer: &dyn MarkdownRenderer,
        on_navigate: Arc<dyn Navigator>,
    ) -> Result<(), RenderError> {
        let header = sink.create_section(SectionKind::BlockHeader);
        let content = sink.create_section(SectionKind::BlockContent);
        self.header = Some(header);
        self.content = Some(content);
        self.on_navigate = Some(on_navigate);
        self.expanded = true;
        sink.set_content(header, self.header_text());
        sink.set_visible(content, true);

        let rendered = match &self.entry.content {
            EntryContent::Block(block) => renderer.render(&block.text, &block.source, context),
            EntryContent::NotFound => Ok(RichText::line(RenderedLine::styled(
                NOT_FOUND_TEXT,
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ))),
        };
        match rendered {
            Ok(text) => {
                sink.set_content(content, text);
                Ok(())
            }
            Err(err) => {
                warn!(source = %self.entry.source, error = %err, "backlink block failed to render");
                sink.set_content(
                    content,
                    RichText::line(RenderedLine::styled(
                        format!("Failed to render block: {}", err.message),
                        Style::default().fg(Color::Red),
                    )),
                );
                Err(err)
            }
        }
    }

    pub fn toggle(&mut self, sink: &mut dyn PresentationSink) {
        let (Some(header), Some(content)) = (self.header, self.content) else {
            return;
        };
        self.expanded = !self.expanded;
        sink.set_visible(content, self.expanded);
        sink.set_content(header, self.header_text());
    }

    pub fn click_label(&self) -> LinkClick {
        match &self.on_navigate {
            Some(navigator) => {
                navigator.open_note(&self.entry.source);
                LinkClick::DefaultPrevented
            }
            None => LinkClick::Ignored,
        }
    }

    fn header_text(&self) -> RichText {
        let marker = if self.expanded {
            EXPANDED_MARKER
        } else {
            COLLAPSED_MARKER
        };
        let mut line = RenderedLine::default();
        line.push(marker, Style::default().fg(Color::DarkGray));
        line.push(" ", Style::default());
        line.push(
            self.entry.source.display_name(),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::UNDERLINED),
        );
        RichText::line(line)
    }
}
