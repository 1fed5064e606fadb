use std::io;

use thiserror::Error;

use crate::block::FileId;

/// Failure to fetch a source note's text.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0} does not exist")]
    NotFound(FileId),
    #[error("failed to read {file}")]
    Io {
        file: FileId,
        #[source]
        source: io::Error,
    },
}

impl ReadError {
    pub fn from_io(file: &FileId, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound(file.clone())
        } else {
            Self::Io {
                file: file.clone(),
                source,
            }
        }
    }
}

/// The host renderer could not turn a block into rich text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to render block from {source_file}: {message}")]
pub struct RenderError {
    pub source_file: FileId,
    pub message: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PanelError {
    #[error("view for {0} has no region to attach a backlinks panel to")]
    ContainerMissing(FileId),
}
