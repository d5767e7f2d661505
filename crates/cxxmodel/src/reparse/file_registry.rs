//
// reparse/file_registry.rs
//
// Lifecycle bookkeeping for every source file the model knows about
//

use std::collections::BTreeSet;

use dashmap::DashMap;

use super::fingerprint::ConditionalFingerprint;
use super::types::{AstHandle, FileKey, FileKind, FileState, ProjectId};

/// Everything the model remembers about one source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub key: FileKey,
    pub kind: FileKind,
    pub state: FileState,
    /// Fingerprint of the latest successful parse
    pub fingerprint: ConditionalFingerprint,
    pub ast: Option<AstHandle>,
    /// Headers reached during the latest parse (translation units only)
    pub included_headers: BTreeSet<FileKey>,
    /// Set when the text changed while a worker was parsing the file
    pub modified_while_parsing: bool,
    pub parse_count: u64,
}

impl SourceFile {
    fn new(key: FileKey, kind: FileKind) -> Self {
        Self {
            key,
            kind,
            state: FileState::Initial,
            fingerprint: ConditionalFingerprint::empty(),
            ast: None,
            included_headers: BTreeSet::new(),
            modified_while_parsing: false,
            parse_count: 0,
        }
    }
}

/// Result of [`FileRegistry::mark_stale`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleMark {
    /// A parse is running; its result will be discarded
    WasParsing,
    Marked,
    Unknown,
}

/// Result of [`FileRegistry::complete_parse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCompletion {
    /// Results stored. Carries the headers included by the previous parse.
    Stored { previous_headers: BTreeSet<FileKey> },
    /// The file changed during the parse; it is stale again
    Discarded,
    /// The file was removed or never registered
    Unknown,
}

/// Concurrent map of [`SourceFile`]s keyed by [`FileKey`]
#[derive(Debug, Default)]
pub struct FileRegistry {
    files: DashMap<FileKey, SourceFile>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a discovered file. Returns false if it was already known and
    /// not removed.
    pub fn register(&self, key: &FileKey, kind: FileKind) -> bool {
        let mut inserted = true;
        self.files
            .entry(key.clone())
            .and_modify(|file| {
                if file.state == FileState::Removed {
                    *file = SourceFile::new(key.clone(), kind);
                } else {
                    inserted = false;
                }
            })
            .or_insert_with(|| SourceFile::new(key.clone(), kind));
        inserted
    }

    pub fn get(&self, key: &FileKey) -> Option<SourceFile> {
        self.files.get(key).map(|file| file.clone())
    }

    pub fn contains(&self, key: &FileKey) -> bool {
        self.files.contains_key(key)
    }

    pub fn state(&self, key: &FileKey) -> Option<FileState> {
        self.files.get(key).map(|file| file.state)
    }

    pub fn kind(&self, key: &FileKey) -> Option<FileKind> {
        self.files.get(key).map(|file| file.kind)
    }

    pub fn fingerprint(&self, key: &FileKey) -> Option<ConditionalFingerprint> {
        self.files.get(key).map(|file| file.fingerprint.clone())
    }

    /// Mark a file as waiting in the queue. A running parse keeps `Parsing`.
    pub fn mark_queued(&self, key: &FileKey) {
        if let Some(mut file) = self.files.get_mut(key) {
            if !matches!(file.state, FileState::Parsing | FileState::Removed) {
                file.state = FileState::Queued;
            }
        }
    }

    /// A worker picked the file up. Returns false for unknown or removed files.
    pub fn begin_parse(&self, key: &FileKey) -> bool {
        match self.files.get_mut(key) {
            Some(mut file) if file.state != FileState::Removed => {
                file.state = FileState::Parsing;
                file.modified_while_parsing = false;
                true
            }
            _ => false,
        }
    }

    pub fn mark_stale(&self, key: &FileKey) -> StaleMark {
        match self.files.get_mut(key) {
            Some(mut file) => match file.state {
                FileState::Removed => StaleMark::Unknown,
                FileState::Parsing => {
                    file.modified_while_parsing = true;
                    StaleMark::WasParsing
                }
                _ => {
                    file.state = FileState::Stale;
                    StaleMark::Marked
                }
            },
            None => StaleMark::Unknown,
        }
    }

    /// Store the results of a finished parse unless the file changed
    /// meanwhile. `included_headers` replaces the recorded inclusion list
    /// when given.
    pub fn complete_parse(
        &self,
        key: &FileKey,
        fingerprint: ConditionalFingerprint,
        ast: AstHandle,
        included_headers: Option<BTreeSet<FileKey>>,
    ) -> ParseCompletion {
        let Some(mut file) = self.files.get_mut(key) else {
            return ParseCompletion::Unknown;
        };
        if file.state == FileState::Removed {
            return ParseCompletion::Unknown;
        }
        if file.modified_while_parsing {
            file.modified_while_parsing = false;
            file.state = FileState::Stale;
            return ParseCompletion::Discarded;
        }
        file.state = FileState::Parsed;
        file.fingerprint = fingerprint;
        file.ast = Some(ast);
        file.parse_count += 1;
        let previous_headers = match included_headers {
            Some(headers) => std::mem::replace(&mut file.included_headers, headers),
            None => BTreeSet::new(),
        };
        ParseCompletion::Stored { previous_headers }
    }

    /// A worker ended without producing results for the file
    pub fn abandon_parse(&self, key: &FileKey) {
        if let Some(mut file) = self.files.get_mut(key) {
            if file.state != FileState::Parsing {
                return;
            }
            file.state = if file.modified_while_parsing {
                FileState::Stale
            } else if file.parse_count > 0 {
                FileState::Parsed
            } else {
                FileState::Initial
            };
            file.modified_while_parsing = false;
        }
    }

    /// The parser failed; the file stays stale until the next request
    pub fn fail_parse(&self, key: &FileKey) {
        if let Some(mut file) = self.files.get_mut(key) {
            if file.state != FileState::Removed {
                file.state = FileState::Stale;
                file.modified_while_parsing = false;
            }
        }
    }

    /// Mark a file deleted. Returns its last known record.
    pub fn mark_removed(&self, key: &FileKey) -> Option<SourceFile> {
        let mut file = self.files.get_mut(key)?;
        file.state = FileState::Removed;
        Some(file.clone())
    }

    pub fn remove(&self, key: &FileKey) -> Option<SourceFile> {
        self.files.remove(key).map(|(_, file)| file)
    }

    /// Drop every file of `project`; returns their keys
    pub fn remove_project(&self, project: &ProjectId) -> Vec<FileKey> {
        let mut removed = Vec::new();
        self.files.retain(|key, _| {
            if &key.project == project {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });
        removed.sort();
        removed
    }

    pub fn files_of(&self, project: &ProjectId) -> Vec<FileKey> {
        let mut files: Vec<_> = self
            .files
            .iter()
            .filter(|entry| &entry.key().project == project)
            .map(|entry| entry.key().clone())
            .collect();
        files.sort();
        files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
