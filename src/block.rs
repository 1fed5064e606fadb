use std::fmt;
use std::ops::Range;

/// Vault-relative path of a note, always using `/` separators.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(String);

impl FileId {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().replace('\\', "/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bare note name: no folder, no extension. This is what `[[...]]` links use.
    pub fn note_name(&self) -> &str {
        let file = self.0.rsplit('/').next().unwrap_or(&self.0);
        match file.rfind('.') {
            Some(dot) if dot > 0 => &file[..dot],
            _ => file,
        }
    }

    /// Path shown in headers, with the markdown extension stripped.
    pub fn display_name(&self) -> &str {
        self.0.strip_suffix(".md").unwrap_or(&self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

pub fn link_token(note_name: &str) -> String {
    format!("[[{note_name}]]")
}

/// One occurrence of a link token inside a source document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reference {
    pub offset: usize,
    pub line: usize,
}

/// Every occurrence of `[[note_name]]` in `content`, in positional order.
///
/// Matching is literal and case-sensitive. An empty note name never matches.
pub fn find_references(content: &str, note_name: &str) -> Vec<Reference> {
    if note_name.is_empty() {
        return Vec::new();
    }
    let token = link_token(note_name);
    let mut line = 0;
    let mut scanned = 0;
    content
        .match_indices(&token)
        .map(|(offset, _)| {
            line += content[scanned..offset].matches('\n').count();
            scanned = offset;
            Reference { offset, line }
        })
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSpan {
    pub bytes: Range<usize>,
    pub first_line: usize,
    pub last_line: usize,
}

/// Text selected by a boundary strategy around one reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub source: FileId,
    pub text: String,
    pub span: BlockSpan,
}

impl Block {
    pub(crate) fn from_span(
        source: &FileId,
        content: &str,
        bytes: Range<usize>,
        first_line: usize,
    ) -> Self {
        let text = content[bytes.clone()].to_string();
        let last_line = first_line + text.trim_end_matches('\n').matches('\n').count();
        Self {
            source: source.clone(),
            text,
            span: BlockSpan {
                bytes,
                first_line,
                last_line,
            },
        }
    }
}
