use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::aggregate::{Aggregation, BacklinkAggregator};
use crate::block::FileId;
use crate::error::PanelError;
use crate::host::{
    backlink_sources, FileAccess, HostView, LinkGraph, MarkdownRenderer, Navigator,
    PresentationSink, Settings,
};
use crate::panel::BacklinksPanel;

/// The collaborators a manager needs for its whole lifetime.
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn Settings>,
    pub link_graph: Arc<dyn LinkGraph>,
    pub files: Arc<dyn FileAccess>,
    pub renderer: Arc<dyn MarkdownRenderer>,
    pub navigator: Arc<dyn Navigator>,
}

enum PanelState<S> {
    Idle,
    Active {
        panel: BacklinksPanel<S>,
        generation: u64,
    },
}

struct Finished {
    generation: u64,
    aggregation: Aggregation,
}

/// Owns the single backlinks panel and keeps it in step with the open note.
pub struct CoalesceManager<S> {
    collaborators: Collaborators,
    state: PanelState<S>,
    generation: u64,
    finished_tx: Sender<Finished>,
    finished_rx: Receiver<Finished>,
}

impl<S: PresentationSink> CoalesceManager<S> {
    pub fn new(collaborators: Collaborators) -> Self {
        let (finished_tx, finished_rx) = mpsc::channel();
        Self {
            collaborators,
            state: PanelState::Idle,
            generation: 0,
            finished_tx,
            finished_rx,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, PanelState::Active { .. })
    }

    pub fn panel(&self) -> Option<&BacklinksPanel<S>> {
        match &self.state {
            PanelState::Active { panel, .. } => Some(panel),
            PanelState::Idle => None,
        }
    }

    pub fn panel_mut(&mut self) -> Option<&mut BacklinksPanel<S>> {
        match &mut self.state {
            PanelState::Active { panel, .. } => Some(panel),
            PanelState::Idle => None,
        }
    }

    /// Installs a fresh panel for `file` and starts collecting its backlinks.
    ///
    /// Any previous panel is cleared first, even when the new view turns out to
    /// have no region to attach to.
    pub fn handle_file_open<V>(&mut self, file: &FileId, view: &mut V) -> Result<(), PanelError>
    where
        V: HostView<Surface = S>,
    {
        self.clear_backlinks();
        self.generation += 1;
        let generation = self.generation;

        let kind = self.collaborators.settings.current_boundary_strategy_kind();
        let strategy = kind.resolve();
        let sources = backlink_sources(self.collaborators.link_graph.as_ref(), file);

        let Some(surface) = view.attach_panel_region() else {
            warn!(note = %file, "no region to attach backlinks panel to");
            return Err(PanelError::ContainerMissing(file.clone()));
        };
        let panel = BacklinksPanel::new(file.clone(), view.context(), surface);
        self.state = PanelState::Active { panel, generation };
        info!(note = %file, strategy = %kind, sources = sources.len(), generation, "note opened");

        let files = self.collaborators.files.clone();
        let note_name = file.note_name().to_string();
        let finished_tx = self.finished_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("backlinks-{generation}"))
            .spawn(move || {
                let aggregation =
                    BacklinkAggregator::new(files).collect(&note_name, &sources, strategy.as_ref());
                let _ = finished_tx.send(Finished {
                    generation,
                    aggregation,
                });
            });
        if let Err(err) = spawned {
            warn!(note = %file, error = %err, "failed to start backlinks worker");
        }
        Ok(())
    }

    /// Applies finished pipelines. Returns whether the visible panel changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(finished) = self.finished_rx.try_recv() {
            changed |= self.apply(finished);
        }
        changed
    }

    /// Blocks until the current panel's pipeline lands or `timeout` passes.
    pub fn wait_for_backlinks(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_active() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.finished_rx.recv_timeout(remaining) {
                Ok(finished) => {
                    if self.apply(finished) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return false,
            }
        }
        false
    }

    /// Drops the panel, if any. Safe to call when idle.
    pub fn clear_backlinks(&mut self) {
        if let PanelState::Active { mut panel, .. } =
            std::mem::replace(&mut self.state, PanelState::Idle)
        {
            panel.clear();
        }
    }

    fn apply(&mut self, finished: Finished) -> bool {
        let PanelState::Active { panel, generation } = &mut self.state else {
            debug!(generation = finished.generation, "discarding backlinks, no panel");
            return false;
        };
        if *generation != finished.generation {
            debug!(
                stale = finished.generation,
                current = *generation,
                "discarding stale backlinks"
            );
            return false;
        }
        panel.show_backlinks(
            finished.aggregation,
            self.collaborators.renderer.as_ref(),
            self.collaborators.navigator.clone(),
        );
        true
    }
}
