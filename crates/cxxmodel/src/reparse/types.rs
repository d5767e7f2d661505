//
// reparse/types.rs
//
// Identities, lifecycle states and work items for incremental reparsing
//

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::fingerprint::ConditionalFingerprint;

/// Identity of a project (an application or a library the application uses)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(Arc<str>);

impl ProjectId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProjectId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a source file: normalized absolute path plus owning project.
///
/// The same path opened by two projects yields two distinct files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileKey {
    pub project: ProjectId,
    path: Arc<Path>,
}

impl FileKey {
    pub fn new(project: ProjectId, path: impl AsRef<Path>) -> Self {
        Self {
            project,
            path: Arc::from(normalize_path(path.as_ref())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.project, self.path.display())
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding component. Never climbs above the root; leading `..` of a
/// relative path are kept.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Lifecycle state of a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileState {
    /// Discovered, never scheduled
    #[default]
    Initial,
    /// Waiting in the reparse queue
    Queued,
    /// A worker is parsing it right now
    Parsing,
    /// Parse results are current
    Parsed,
    /// Text or macro visibility changed; results are outdated
    Stale,
    /// Deleted or excluded from its project
    Removed,
}

/// Whether a file is compiled on its own or only reached through `#include`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FileKind {
    #[default]
    TranslationUnit,
    Header,
}

/// Priority class of a work item.
///
/// `Immediate` items are always drained first (FIFO among themselves). `Head`
/// items go to the front of the normal segment, `Tail` items to its back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    Immediate,
    Head,
    Tail,
}

impl Priority {
    /// Strength used when coalescing requests (higher wins)
    pub fn rank(self) -> u8 {
        match self {
            Priority::Immediate => 2,
            Priority::Head => 1,
            Priority::Tail => 0,
        }
    }

    /// The stronger of two priority classes
    pub fn max(self, other: Priority) -> Priority {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }

    pub fn parse(value: &str) -> Option<Priority> {
        match value {
            "immediate" => Some(Priority::Immediate),
            "head" => Some(Priority::Head),
            "tail" => Some(Priority::Tail),
            _ => None,
        }
    }
}

/// Desired outcome of a work item.
///
/// Ordered by strength: merging two requests keeps the stronger target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParseTarget {
    /// First parse, or parse in an additional inclusion context
    Parse,
    /// The last edit touched live code only
    PartialReparse,
    /// Drop previous results and parse from scratch
    Reparse,
}

impl ParseTarget {
    pub fn merge(self, other: ParseTarget) -> ParseTarget {
        std::cmp::max(self, other)
    }
}

/// One macro-visibility equivalence class under which a header was seen:
/// the including project plus the header's conditional fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InclusionContext {
    pub project: ProjectId,
    pub fingerprint: ConditionalFingerprint,
}

impl InclusionContext {
    pub fn new(project: ProjectId, fingerprint: ConditionalFingerprint) -> Self {
        Self {
            project,
            fingerprint,
        }
    }
}

impl fmt::Display for InclusionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.project, self.fingerprint)
    }
}

/// Opaque handle to a parsed model produced by the external parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AstHandle(pub u64);

/// Pending reparse request, consumed exactly once by a worker or dropped on
/// cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub file: FileKey,
    pub target: ParseTarget,
    pub priority: Priority,
    /// Enqueue sequence number; kept when the item is coalesced
    pub seq: u64,
    /// Inclusion contexts to parse the file in. Empty means the file is parsed
    /// as its own translation unit.
    pub contexts: Vec<InclusionContext>,
}

impl WorkItem {
    pub fn is_unit_parse(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Fold another request for the same file into this one.
    /// The priority is not touched; the queue decides about moving the item.
    pub(crate) fn absorb(&mut self, target: ParseTarget, contexts: Vec<InclusionContext>) {
        self.target = self.target.merge(target);
        for context in contexts {
            if !self.contexts.contains(&context) {
                self.contexts.push(context);
            }
        }
    }
}
