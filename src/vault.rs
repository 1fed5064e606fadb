//! On-disk vault: the link graph and file access the viewer hands to the core.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::block::FileId;
use crate::error::ReadError;
use crate::host::{FileAccess, LinkGraph, ResolvedLinks};

const NOTE_EXTENSIONS: [&str; 3] = ["md", "markdown", "mdx"];

fn wikilink_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!?\[\[([^\[\]|#]+)(?:#[^\[\]|]*)?(?:\|[^\[\]]*)?\]\]").ok())
        .as_ref()
}

fn markdown_link_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\]\(([^)\s#]+\.(?:md|markdown|mdx))(?:#[^)]*)?\)").ok())
        .as_ref()
}

#[derive(Debug, Default)]
struct Index {
    notes: Vec<FileId>,
    links: ResolvedLinks,
}

/// A directory of markdown notes.
#[derive(Debug)]
pub struct Vault {
    root: PathBuf,
    index: RwLock<Index>,
}

impl Vault {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let root = fs::canonicalize(&root)
            .with_context(|| format!("Failed to open vault {}", root.display()))?;
        let vault = Self {
            root,
            index: RwLock::new(Index::default()),
        };
        vault.refresh();
        Ok(vault)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, file: &FileId) -> PathBuf {
        self.root.join(file.as_str())
    }

    /// Vault-relative id for `path`, or `None` when it lies outside the vault.
    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        let canonical = fs::canonicalize(path).ok()?;
        let relative = canonical.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(FileId::new(parts.join("/")))
    }

    pub fn notes(&self) -> Vec<FileId> {
        self.index
            .read()
            .map(|index| index.notes.clone())
            .unwrap_or_default()
    }

    /// Rescans every note and rebuilds the link graph.
    pub fn refresh(&self) {
        let notes = self.scan_notes();
        let mut links = ResolvedLinks::new();
        for source in &notes {
            let content = match fs::read_to_string(self.path_of(source)) {
                Ok(content) => content,
                Err(err) => {
                    warn!(source = %source, error = %err, "skipping unreadable note");
                    continue;
                }
            };
            let targets = outbound_links(source, &content, &notes);
            if !targets.is_empty() {
                links.insert(source.clone(), targets);
            }
        }
        info!(
            root = %self.root.display(),
            notes = notes.len(),
            linking = links.len(),
            "vault indexed"
        );
        if let Ok(mut index) = self.index.write() {
            *index = Index { notes, links };
        }
    }

    /// Resolves a wikilink target like `Project`, `folder/Project` or `Project.md`.
    pub fn resolve_note(&self, target: &str) -> Option<FileId> {
        let index = self.index.read().ok()?;
        resolve_target(target, &index.notes)
    }

    fn scan_notes(&self) -> Vec<FileId> {
        let mut builder = WalkBuilder::new(&self.root);
        builder.hidden(true).git_ignore(true).require_git(false);

        let mut notes: Vec<FileId> = builder
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_file()))
            .filter(|entry| is_note_path(entry.path()))
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&self.root).ok()?;
                Some(FileId::new(relative.to_string_lossy()))
            })
            .collect();
        notes.sort();
        notes
    }
}

impl LinkGraph for Vault {
    fn resolved_links(&self) -> ResolvedLinks {
        self.index
            .read()
            .map(|index| index.links.clone())
            .unwrap_or_default()
    }
}

impl FileAccess for Vault {
    fn read(&self, file: &FileId) -> Result<String, ReadError> {
        fs::read_to_string(self.path_of(file)).map_err(|err| ReadError::from_io(file, err))
    }
}

/// Whether `path` has one of the note extensions the index picks up.
pub fn is_note_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|ext| NOTE_EXTENSIONS.contains(&ext.as_str()))
}

fn outbound_links(source: &FileId, content: &str, notes: &[FileId]) -> BTreeMap<FileId, usize> {
    let mut targets = BTreeMap::new();
    let (Some(wikilinks), Some(markdown_links)) = (wikilink_re(), markdown_link_re()) else {
        return targets;
    };
    for caps in wikilinks.captures_iter(content) {
        let Some(target) = caps.get(1).map(|m| m.as_str().trim()) else {
            continue;
        };
        match resolve_target(target, notes) {
            Some(file) => *targets.entry(file).or_insert(0) += 1,
            None => debug!(source = %source, link = target, "unresolved wikilink"),
        }
    }
    for caps in markdown_links.captures_iter(content) {
        let Some(target) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if let Some(file) = resolve_relative(source, target, notes) {
            *targets.entry(file).or_insert(0) += 1;
        }
    }
    targets
}

fn resolve_target(target: &str, notes: &[FileId]) -> Option<FileId> {
    let target = target.trim();
    if target.is_empty() {
        return None;
    }
    let with_ext = if is_note_path(Path::new(target)) {
        target.to_string()
    } else {
        format!("{target}.md")
    };
    if let Some(exact) = notes.iter().find(|note| note.as_str() == with_ext) {
        return Some(exact.clone());
    }
    if target.contains('/') {
        return notes
            .iter()
            .find(|note| note.as_str().ends_with(&format!("/{with_ext}")))
            .cloned();
    }
    let name = FileId::new(with_ext.as_str());
    notes
        .iter()
        .find(|note| note.note_name() == name.note_name())
        .cloned()
}

/// Resolves a markdown link relative to the folder holding `source`.
fn resolve_relative(source: &FileId, target: &str, notes: &[FileId]) -> Option<FileId> {
    let base = Path::new(source.as_str()).parent().unwrap_or(Path::new(""));
    let mut parts: Vec<String> = Vec::new();
    for component in base.join(target).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop()?;
            }
            _ => {}
        }
    }
    let candidate = parts.join("/");
    notes.iter().find(|note| note.as_str() == candidate).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::backlink_sources;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn sample_vault() -> (tempfile::TempDir, Vault) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "Project.md", "# Project\n");
        write(root, "Daily.md", "[[Project]] kickoff\n[[Project|alias]] again\n");
        write(root, "journal/Log.md", "See [[Project#Goals]] and [[journal/Ideas]].\n");
        write(root, "journal/Ideas.md", "[the project](../Project.md)\n[[Nowhere]]\n");
        write(root, ".obsidian/cache.md", "[[Project]]\n");
        write(root, "image.png", "not a note");
        let vault = Vault::open(root).unwrap();
        (dir, vault)
    }

    #[test]
    fn indexes_only_visible_markdown_notes() {
        let (_dir, vault) = sample_vault();
        assert_eq!(
            vault.notes(),
            vec![
                FileId::new("Daily.md"),
                FileId::new("Project.md"),
                FileId::new("journal/Ideas.md"),
                FileId::new("journal/Log.md"),
            ]
        );
    }

    #[test]
    fn resolved_links_count_every_link_form() {
        let (_dir, vault) = sample_vault();
        let links = vault.resolved_links();

        let daily = &links[&FileId::new("Daily.md")];
        assert_eq!(daily.get(&FileId::new("Project.md")), Some(&2));

        let log = &links[&FileId::new("journal/Log.md")];
        assert_eq!(log.get(&FileId::new("Project.md")), Some(&1));
        assert_eq!(log.get(&FileId::new("journal/Ideas.md")), Some(&1));

        let ideas = &links[&FileId::new("journal/Ideas.md")];
        assert_eq!(ideas.len(), 1);
        assert_eq!(ideas.get(&FileId::new("Project.md")), Some(&1));

        assert!(!links.contains_key(&FileId::new("Project.md")));
    }

    #[test]
    fn backlink_sources_come_out_in_path_order() {
        let (_dir, vault) = sample_vault();
        assert_eq!(
            backlink_sources(&vault, &FileId::new("Project.md")),
            vec![
                FileId::new("Daily.md"),
                FileId::new("journal/Ideas.md"),
                FileId::new("journal/Log.md"),
            ]
        );
    }

    #[test]
    fn read_distinguishes_missing_files() {
        let (_dir, vault) = sample_vault();
        assert_eq!(vault.read(&FileId::new("Project.md")).unwrap(), "# Project\n");
        assert!(matches!(
            vault.read(&FileId::new("Gone.md")),
            Err(ReadError::NotFound(file)) if file == FileId::new("Gone.md")
        ));
    }

    #[test]
    fn refresh_picks_up_new_links() {
        let (dir, vault) = sample_vault();
        write(dir.path(), "Later.md", "[[Daily]]\n");
        assert!(backlink_sources(&vault, &FileId::new("Daily.md")).is_empty());
        vault.refresh();
        assert_eq!(
            backlink_sources(&vault, &FileId::new("Daily.md")),
            vec![FileId::new("Later.md")]
        );
    }

    #[test]
    fn resolve_note_handles_names_paths_and_extensions() {
        let (dir, vault) = sample_vault();
        assert_eq!(vault.resolve_note("Project"), Some(FileId::new("Project.md")));
        assert_eq!(vault.resolve_note("Ideas"), Some(FileId::new("journal/Ideas.md")));
        assert_eq!(vault.resolve_note("journal/Log"), Some(FileId::new("journal/Log.md")));
        assert_eq!(vault.resolve_note("Log.md"), Some(FileId::new("journal/Log.md")));
        assert_eq!(vault.resolve_note("Nowhere"), None);
        assert_eq!(
            vault.file_id(&dir.path().join("journal/Log.md")),
            Some(FileId::new("journal/Log.md"))
        );
        assert_eq!(vault.file_id(Path::new("/definitely/not/here.md")), None);
    }
}
