use std::fmt;
use std::sync::Arc;

use clap::ValueEnum;

use crate::block::{find_references, Block, FileId};

/// Closed set of block boundary policies a user can pick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum BoundaryStrategyKind {
    /// From the reference up to the next thematic break.
    #[default]
    Default,
    /// Only the line holding the reference.
    SingleLine,
}

impl BoundaryStrategyKind {
    pub const ALL: [Self; 2] = [Self::Default, Self::SingleLine];

    pub fn resolve(self) -> Arc<dyn BoundaryStrategy> {
        match self {
            Self::Default => Arc::new(DefaultBoundary),
            Self::SingleLine => Arc::new(SingleLineBoundary),
        }
    }

    pub fn next(self) -> Self {
        match self {
            Self::Default => Self::SingleLine,
            Self::SingleLine => Self::Default,
        }
    }
}

impl fmt::Display for BoundaryStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::SingleLine => "single-line",
        })
    }
}

/// Segments a source document into the blocks that mention a note.
///
/// Implementations are pure: the same `(content, note_name)` always yields the
/// same blocks, and a missing reference yields an empty `Vec` rather than an
/// error.
pub trait BoundaryStrategy: Send + Sync {
    fn kind(&self) -> BoundaryStrategyKind;

    fn extract_blocks(&self, source: &FileId, content: &str, note_name: &str) -> Vec<Block>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultBoundary;

impl BoundaryStrategy for DefaultBoundary {
    fn kind(&self) -> BoundaryStrategyKind {
        BoundaryStrategyKind::Default
    }

    fn extract_blocks(&self, source: &FileId, content: &str, note_name: &str) -> Vec<Block> {
        find_references(content, note_name)
            .into_iter()
            .map(|reference| {
                let end = next_thematic_break(content, reference.offset).unwrap_or(content.len());
                Block::from_span(source, content, reference.offset..end, reference.line)
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SingleLineBoundary;

impl BoundaryStrategy for SingleLineBoundary {
    fn kind(&self) -> BoundaryStrategyKind {
        BoundaryStrategyKind::SingleLine
    }

    fn extract_blocks(&self, source: &FileId, content: &str, note_name: &str) -> Vec<Block> {
        find_references(content, note_name)
            .into_iter()
            .map(|reference| {
                let start = content[..reference.offset]
                    .rfind('\n')
                    .map_or(0, |newline| newline + 1);
                let mut end = content[reference.offset..]
                    .find('\n')
                    .map_or(content.len(), |newline| reference.offset + newline);
                if content[..end].ends_with('\r') {
                    end -= 1;
                }
                Block::from_span(source, content, start..end, reference.line)
            })
            .collect()
    }
}

/// Byte offset where the first thematic-break line after `from`'s own line starts.
fn next_thematic_break(content: &str, from: usize) -> Option<usize> {
    let mut line_start = from + content[from..].find('\n')? + 1;
    while line_start < content.len() {
        let rest = &content[line_start..];
        let line = rest.split('\n').next().unwrap_or(rest);
        if is_thematic_break(line) {
            return Some(line_start);
        }
        line_start += line.len() + 1;
    }
    None
}

/// Three or more `-` and nothing else apart from trailing whitespace.
pub fn is_thematic_break(line: &str) -> bool {
    let line = line.trim_end();
    line.len() >= 3 && line.bytes().all(|b| b == b'-')
}
