//! Backlinks with context for a terminal markdown pager.
//!
//! When a note is opened, every note that links to it is read, the block
//! around each `[[link]]` is cut out by a [`BoundaryStrategy`], and the
//! results are shown as collapsible previews beneath the note. The core
//! (`block` through `manager`) talks to its host only through the traits in
//! [`host`]; `vault`, `render`, `surface` and `app` are the terminal host.

pub mod aggregate;
pub mod app;
pub mod block;
pub mod component;
pub mod error;
pub mod host;
pub mod manager;
pub mod panel;
pub mod render;
pub mod strategy;
pub mod surface;
pub mod vault;

#[cfg(test)]
mod test_support;

pub use aggregate::{Aggregation, BacklinkAggregator, BacklinkEntry, EntryContent};
pub use block::{Block, BlockSpan, FileId};
pub use component::{BlockComponent, LinkClick};
pub use error::{PanelError, ReadError, RenderError};
pub use manager::{CoalesceManager, Collaborators};
pub use panel::BacklinksPanel;
pub use strategy::{BoundaryStrategy, BoundaryStrategyKind, DefaultBoundary, SingleLineBoundary};
