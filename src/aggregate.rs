use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use tracing::{debug, warn};

use crate::block::{Block, FileId};
use crate::error::ReadError;
use crate::host::FileAccess;
use crate::strategy::BoundaryStrategy;

/// Upper bound on reads in flight. Workers pull the next source as soon as
/// their previous read resolves.
const MAX_CONCURRENT_READS: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryContent {
    Block(Block),
    /// The file links to the note but the literal link token was not found.
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BacklinkEntry {
    pub source: FileId,
    pub content: EntryContent,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Aggregation {
    pub entries: Vec<BacklinkEntry>,
    /// Readable source files, including those with only a placeholder entry.
    pub contributing: usize,
    pub skipped: Vec<FileId>,
}

impl Aggregation {
    /// Every source the link graph reported, readable or not.
    pub fn linking(&self) -> usize {
        self.contributing + self.skipped.len()
    }
}

pub struct BacklinkAggregator {
    files: Arc<dyn FileAccess>,
}

impl BacklinkAggregator {
    pub fn new(files: Arc<dyn FileAccess>) -> Self {
        Self { files }
    }

    pub fn collect(
        &self,
        note_name: &str,
        sources: &[FileId],
        strategy: &dyn BoundaryStrategy,
    ) -> Aggregation {
        let mut aggregation = Aggregation::default();
        for (source, read) in sources.iter().zip(self.read_all(sources)) {
            match read {
                Ok(content) => {
                    aggregation.contributing += 1;
                    let blocks = strategy.extract_blocks(source, &content, note_name);
                    if blocks.is_empty() {
                        debug!(source = %source, note = note_name, "reference not found");
                        aggregation.entries.push(BacklinkEntry {
                            source: source.clone(),
                            content: EntryContent::NotFound,
                        });
                    }
                    aggregation
                        .entries
                        .extend(blocks.into_iter().map(|block| BacklinkEntry {
                            source: source.clone(),
                            content: EntryContent::Block(block),
                        }));
                }
                Err(err) => {
                    warn!(source = %source, error = %err, "skipping unreadable backlink");
                    aggregation.skipped.push(source.clone());
                }
            }
        }
        debug!(
            note = note_name,
            entries = aggregation.entries.len(),
            contributing = aggregation.contributing,
            skipped = aggregation.skipped.len(),
            "collected backlinks"
        );
        aggregation
    }

    /// Reads `sources` on a bounded pool. Results come back in supplied order.
    fn read_all(&self, sources: &[FileId]) -> Vec<Result<String, ReadError>> {
        let workers = sources.len().min(MAX_CONCURRENT_READS);
        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let next = &next;
                let files = &self.files;
                scope.spawn(move || loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(source) = sources.get(idx) else {
                        break;
                    };
                    let read = panic::catch_unwind(AssertUnwindSafe(|| files.read(source)))
                        .unwrap_or_else(|_| Err(failed(source, "reader panicked")));
                    if tx.send((idx, read)).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut results: Vec<Option<Result<String, ReadError>>> =
            sources.iter().map(|_| None).collect();
        for (idx, read) in rx {
            if let Some(slot) = results.get_mut(idx) {
                *slot = Some(read);
            }
        }
        results
            .into_iter()
            .zip(sources)
            .map(|(read, source)| {
                read.unwrap_or_else(|| Err(failed(source, "read never finished")))
            })
            .collect()
    }
}

fn failed(source: &FileId, message: &str) -> ReadError {
    ReadError::Io {
        file: source.clone(),
        source: io::Error::other(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::strategy::{BoundaryStrategyKind, DefaultBoundary, SingleLineBoundary};
    use crate::test_support::{Gate, MemoryFiles};

    fn ids(names: &[&str]) -> Vec<FileId> {
        names.iter().map(|name| FileId::new(*name)).collect()
    }

    fn sources_of(aggregation: &Aggregation) -> Vec<&str> {
        aggregation
            .entries
            .iter()
            .map(|entry| entry.source.as_str())
            .collect()
    }

    #[test]
    fn results_keep_supplied_order_regardless_of_completion() {
        let files = MemoryFiles::new()
            .with("A.md", "[[N]] from a")
            .with("B.md", "[[N]] from b")
            .with("C.md", "[[N]] from c")
            .delayed("A.md", Duration::from_millis(80))
            .delayed("C.md", Duration::from_millis(40));
        let aggregator = BacklinkAggregator::new(Arc::new(files));

        let aggregation =
            aggregator.collect("N", &ids(&["A.md", "B.md", "C.md"]), &DefaultBoundary);

        assert_eq!(sources_of(&aggregation), vec!["A.md", "B.md", "C.md"]);
        assert_eq!(aggregation.contributing, 3);
    }

    #[test]
    fn unreadable_file_is_skipped_without_affecting_others() {
        let files = MemoryFiles::new().with("B.md", "x\n[[N]] only b\n");
        let aggregator = BacklinkAggregator::new(Arc::new(files));

        let aggregation = aggregator.collect("N", &ids(&["A.md", "B.md"]), &SingleLineBoundary);

        assert_eq!(aggregation.entries.len(), 1);
        assert_eq!(aggregation.entries[0].source.as_str(), "B.md");
        match &aggregation.entries[0].content {
            EntryContent::Block(block) => assert_eq!(block.text, "[[N]] only b"),
            EntryContent::NotFound => panic!("expected a block"),
        }
        assert_eq!(aggregation.skipped, ids(&["A.md"]));
        assert_eq!(aggregation.contributing, 1);
    }

    #[test]
    fn panicking_reader_counts_as_a_failed_read() {
        let files = MemoryFiles::new()
            .with("A.md", "[[N]]")
            .with("B.md", "[[N]]")
            .panicking("A.md");
        let aggregator = BacklinkAggregator::new(Arc::new(files));

        let aggregation = aggregator.collect("N", &ids(&["A.md", "B.md"]), &DefaultBoundary);

        assert_eq!(sources_of(&aggregation), vec!["B.md"]);
        assert_eq!(aggregation.skipped, ids(&["A.md"]));
    }

    #[test]
    fn file_without_token_gets_a_placeholder() {
        let files = MemoryFiles::new()
            .with("Alias.md", "see [[N|the note]]")
            .with("Plain.md", "[[N]] here");
        let aggregator = BacklinkAggregator::new(Arc::new(files));

        let aggregation =
            aggregator.collect("N", &ids(&["Alias.md", "Plain.md"]), &DefaultBoundary);

        assert_eq!(aggregation.entries[0].content, EntryContent::NotFound);
        assert!(matches!(aggregation.entries[1].content, EntryContent::Block(_)));
        assert_eq!(aggregation.contributing, 2);
    }

    #[test]
    fn blocks_of_one_file_stay_grouped_in_position_order() {
        let files = MemoryFiles::new()
            .with("A.md", "[[N]] one\n---\n[[N]] two")
            .with("B.md", "[[N]] three");
        let aggregator = BacklinkAggregator::new(Arc::new(files));

        let aggregation = aggregator.collect("N", &ids(&["A.md", "B.md"]), &DefaultBoundary);

        let texts: Vec<_> = aggregation
            .entries
            .iter()
            .filter_map(|entry| match &entry.content {
                EntryContent::Block(block) => Some(block.text.as_str()),
                EntryContent::NotFound => None,
            })
            .collect();
        assert_eq!(texts, vec!["[[N]] one\n", "[[N]] two", "[[N]] three"]);
    }

    #[test]
    fn large_source_lists_stay_ordered() {
        let names: Vec<String> = (0..40).map(|i| format!("n{i:02}.md")).collect();
        let files = names
            .iter()
            .fold(MemoryFiles::new(), |files, name| files.with(name, "[[N]]"));
        let files = Arc::new(files);
        let aggregator = BacklinkAggregator::new(files.clone());
        let sources: Vec<FileId> =
            names.iter().map(|name| FileId::new(name.as_str())).collect();

        let aggregation =
            aggregator.collect("N", &sources, BoundaryStrategyKind::Default.resolve().as_ref());

        let got: Vec<FileId> = aggregation.entries.iter().map(|e| e.source.clone()).collect();
        assert_eq!(got, sources);
        assert_eq!(files.reads().len(), 40);
        assert!(files.peak_in_flight() <= MAX_CONCURRENT_READS);
    }

    #[test]
    fn a_stuck_read_does_not_hold_back_later_sources() {
        let gate = Gate::default();
        let names: Vec<String> = (0..40).map(|i| format!("n{i:02}.md")).collect();
        let files = names
            .iter()
            .fold(MemoryFiles::new(), |files, name| files.with(name, "[[N]]"))
            .gated("n00.md", &gate);
        let files = Arc::new(files);
        let sources: Vec<FileId> =
            names.iter().map(|name| FileId::new(name.as_str())).collect();

        let worker = {
            let files = files.clone();
            let sources = sources.clone();
            thread::spawn(move || {
                BacklinkAggregator::new(files).collect("N", &sources, &DefaultBoundary)
            })
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while files.reads().len() < 40 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(files.reads().len(), 40);

        gate.open();
        let aggregation = worker.join().unwrap();
        let got: Vec<FileId> = aggregation.entries.iter().map(|e| e.source.clone()).collect();
        assert_eq!(got, sources);
    }

    #[test]
    fn linking_counts_unreadable_sources_too() {
        let files = MemoryFiles::new().with("B.md", "[[N]]");
        let aggregation = BacklinkAggregator::new(Arc::new(files)).collect(
            "N",
            &ids(&["A.md", "B.md"]),
            &DefaultBoundary,
        );
        assert_eq!(aggregation.contributing, 1);
        assert_eq!(aggregation.linking(), 2);
    }

    #[test]
    fn empty_source_list_is_empty() {
        let aggregator = BacklinkAggregator::new(Arc::new(MemoryFiles::new()));
        assert_eq!(aggregator.collect("N", &[], &DefaultBoundary), Aggregation::default());
    }
}
