use std::sync::Arc;

use ratatui::style::{Modifier, Style};
use tracing::{debug, info, warn};

use crate::aggregate::{Aggregation, BacklinkAggregator};
use crate::block::FileId;
use crate::component::{BlockComponent, LinkClick};
use crate::host::{
    FileAccess, MarkdownRenderer, Navigator, PresentationSink, RenderedLine, RichText, SectionKind,
    ViewContext,
};
use crate::strategy::BoundaryStrategy;

/// Backlinks section appended after a note's own content.
pub struct BacklinksPanel<S> {
    note: FileId,
    context: ViewContext,
    surface: S,
    components: Vec<BlockComponent>,
    attached: bool,
}

impl<S: PresentationSink> BacklinksPanel<S> {
    pub fn new(note: FileId, context: ViewContext, surface: S) -> Self {
        Self {
            note,
            context,
            surface,
            components: Vec::new(),
            attached: true,
        }
    }

    pub fn note(&self) -> &FileId {
        &self.note
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn components(&self) -> &[BlockComponent] {
        &self.components
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Collects and renders in one go on the calling thread.
    pub fn update_backlinks(
        &mut self,
        sources: &[FileId],
        files: Arc<dyn FileAccess>,
        strategy: &dyn BoundaryStrategy,
        renderer: &dyn MarkdownRenderer,
        on_navigate: Arc<dyn Navigator>,
    ) {
        let aggregation =
            BacklinkAggregator::new(files).collect(self.note.note_name(), sources, strategy);
        self.show_backlinks(aggregation, renderer, on_navigate);
    }

    /// Replaces whatever the panel shows with `aggregation`.
    pub fn show_backlinks(
        &mut self,
        aggregation: Aggregation,
        renderer: &dyn MarkdownRenderer,
        on_navigate: Arc<dyn Navigator>,
    ) {
        if !self.attached {
            debug!(note = %self.note, "ignoring backlinks for a cleared panel");
            return;
        }
        self.components.clear();
        self.surface.clear();

        let linking = aggregation.linking();
        let header = self.surface.create_section(SectionKind::PanelHeader);
        self.surface.set_content(
            header,
            RichText::line(RenderedLine::styled(
                format!("{linking} Backlinks"),
                Style::default().add_modifier(Modifier::BOLD),
            )),
        );

        let mut failed = 0;
        for entry in aggregation.entries {
            let mut component = BlockComponent::new(entry);
            if component
                .render(&mut self.surface, &self.context, renderer, on_navigate.clone())
                .is_err()
            {
                failed += 1;
            }
            self.components.push(component);
        }
        if failed > 0 {
            warn!(note = %self.note, failed, "some backlink blocks failed to render");
        }
        info!(
            note = %self.note,
            backlinks = linking,
            unreadable = aggregation.skipped.len(),
            blocks = self.components.len(),
            "backlinks panel updated"
        );
    }

    pub fn toggle(&mut self, index: usize) {
        if let Some(component) = self.components.get_mut(index) {
            component.toggle(&mut self.surface);
        }
    }

    pub fn activate(&self, index: usize) -> LinkClick {
        self.components
            .get(index)
            .map_or(LinkClick::Ignored, BlockComponent::click_label)
    }

    /// Detaches from the view and drops every component. Safe to repeat.
    pub fn clear(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.components.clear();
        self.surface.detach();
        debug!(note = %self.note, "backlinks panel cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{BacklinkEntry, EntryContent};
    use crate::strategy::{DefaultBoundary, SingleLineBoundary};
    use crate::test_support::{MemoryFiles, PlainRenderer, RecordingNavigator, RecordingSink};

    fn panel() -> BacklinksPanel<RecordingSink> {
        let note = FileId::new("Project.md");
        BacklinksPanel::new(note.clone(), ViewContext { note }, RecordingSink::attached())
    }

    fn files() -> Arc<MemoryFiles> {
        Arc::new(
            MemoryFiles::new()
                .with(
                    "Daily.md",
                    "Met with team.\n[[Project]] kickoff notes.\n---\nUnrelated section.",
                )
                .with("Log.md", "[[Project]] a\n---\n[[Project]] b")
                .with("Alias.md", "[[Project|P]]"),
        )
    }

    fn sources(names: &[&str]) -> Vec<FileId> {
        names.iter().map(|n| FileId::new(*n)).collect()
    }

    #[test]
    fn header_counts_every_linking_file_and_components_follow_aggregator_order() {
        let mut panel = panel();
        panel.update_backlinks(
            &sources(&["Daily.md", "Missing.md", "Log.md", "Alias.md"]),
            files(),
            &DefaultBoundary,
            &PlainRenderer,
            Arc::new(RecordingNavigator::default()),
        );

        let sink = panel.surface();
        assert_eq!(sink.texts_of(SectionKind::PanelHeader), vec!["4 Backlinks"]);
        assert_eq!(
            sink.texts_of(SectionKind::BlockHeader),
            vec!["▼ Daily", "▼ Log", "▼ Log", "▼ Alias"]
        );
        assert_eq!(
            sink.texts_of(SectionKind::BlockContent)[0],
            "[[Project]] kickoff notes."
        );
        let placeholder = &panel.components()[3];
        assert_eq!(placeholder.entry().content, EntryContent::NotFound);
    }

    #[test]
    fn updating_again_replaces_previous_content() {
        let mut panel = panel();
        let navigator: Arc<dyn Navigator> = Arc::new(RecordingNavigator::default());
        panel.update_backlinks(
            &sources(&["Log.md"]),
            files(),
            &DefaultBoundary,
            &PlainRenderer,
            navigator.clone(),
        );
        panel.update_backlinks(
            &sources(&["Daily.md"]),
            files(),
            &SingleLineBoundary,
            &PlainRenderer,
            navigator,
        );

        assert_eq!(panel.components().len(), 1);
        assert_eq!(panel.surface().texts_of(SectionKind::PanelHeader), vec!["1 Backlinks"]);
        assert_eq!(panel.surface().texts_of(SectionKind::BlockHeader), vec!["▼ Daily"]);
    }

    #[test]
    fn one_failing_block_does_not_hide_its_siblings() {
        let mut panel = panel();
        let files = Arc::new(
            MemoryFiles::new()
                .with("Bad.md", "[[Project]] !fail")
                .with("Good.md", "[[Project]] fine"),
        );
        panel.update_backlinks(
            &sources(&["Bad.md", "Good.md"]),
            files,
            &DefaultBoundary,
            &PlainRenderer,
            Arc::new(RecordingNavigator::default()),
        );
        assert_eq!(
            panel.surface().texts_of(SectionKind::BlockContent),
            vec!["Failed to render block: refused", "[[Project]] fine"]
        );
    }

    #[test]
    fn toggle_and_activate_address_components_by_index() {
        let mut panel = panel();
        let navigator = Arc::new(RecordingNavigator::default());
        panel.update_backlinks(
            &sources(&["Daily.md", "Log.md"]),
            files(),
            &DefaultBoundary,
            &PlainRenderer,
            navigator.clone(),
        );

        panel.toggle(1);
        assert!(panel.components()[0].is_expanded());
        assert!(!panel.components()[1].is_expanded());
        panel.toggle(99);

        assert_eq!(panel.activate(1), LinkClick::DefaultPrevented);
        assert_eq!(panel.activate(99), LinkClick::Ignored);
        assert_eq!(navigator.opened(), vec![FileId::new("Log.md")]);
    }

    #[test]
    fn clear_detaches_once_and_ignores_late_results() {
        let mut panel = panel();
        panel.update_backlinks(
            &sources(&["Daily.md"]),
            files(),
            &DefaultBoundary,
            &PlainRenderer,
            Arc::new(RecordingNavigator::default()),
        );

        panel.clear();
        panel.clear();
        assert!(!panel.is_attached());
        assert_eq!(panel.surface().detach_calls, 1);
        assert!(panel.components().is_empty());

        let late = Aggregation {
            entries: vec![BacklinkEntry {
                source: FileId::new("Daily.md"),
                content: EntryContent::NotFound,
            }],
            contributing: 1,
            skipped: Vec::new(),
        };
        panel.show_backlinks(late, &PlainRenderer, Arc::new(RecordingNavigator::default()));
        assert!(panel.components().is_empty());
        assert!(panel.surface().sections.is_empty());
    }

    #[test]
    fn clear_on_an_empty_panel_is_safe() {
        let mut panel = panel();
        panel.clear();
        assert_eq!(panel.surface().detach_calls, 1);
    }
}
