//! Scripted stand-in for the C/C++ parser.
//!
//! Translation units report whatever inclusions were scripted for them with
//! [`ScriptedParser::set_unit`]. A header parsed in a context reports the
//! context's fingerprint unless [`ScriptedParser::set_header_override`] says
//! otherwise. Every call is recorded so tests can count parser work.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::reparse::fingerprint::ConditionalFingerprint;
use crate::reparse::parser::{Inclusion, ParseOutcome, ParseRequest, Parser};
use crate::reparse::types::{AstHandle, FileKey, InclusionContext, ProjectId};

/// Shorthand for a [`FileKey`]
pub fn file(project: &str, path: &str) -> FileKey {
    FileKey::new(ProjectId::from(project), path)
}

/// Shorthand for a fingerprint built from `[start, end)` pairs
pub fn fingerprint(pairs: &[(u64, u64)]) -> ConditionalFingerprint {
    ConditionalFingerprint::from_intervals(pairs).expect("valid fingerprint")
}

/// One recorded parser call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCall {
    pub file: FileKey,
    pub context: Option<InclusionContext>,
}

#[derive(Debug, Clone, Default)]
struct UnitScript {
    fingerprint: ConditionalFingerprint,
    inclusions: Vec<Inclusion>,
}

type ParseHook = Box<dyn Fn(&ParseRequest<'_>) + Send + Sync>;

#[derive(Default)]
pub struct ScriptedParser {
    units: Mutex<HashMap<FileKey, UnitScript>>,
    header_overrides: Mutex<HashMap<(FileKey, ConditionalFingerprint), ConditionalFingerprint>>,
    failing: Mutex<HashSet<FileKey>>,
    panicking: Mutex<HashSet<FileKey>>,
    calls: Mutex<Vec<ParseCall>>,
    hook: Mutex<Option<ParseHook>>,
    next_ast: AtomicU64,
}

impl std::fmt::Debug for ScriptedParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedParser")
            .field("calls", &self.parse_count())
            .finish_non_exhaustive()
    }
}

impl ScriptedParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result of parsing translation unit `unit`
    pub fn set_unit(
        &self,
        unit: &FileKey,
        own: ConditionalFingerprint,
        inclusions: &[(FileKey, ConditionalFingerprint)],
    ) {
        let script = UnitScript {
            fingerprint: own,
            inclusions: inclusions
                .iter()
                .map(|(header, fingerprint)| Inclusion {
                    header: header.clone(),
                    fingerprint: fingerprint.clone(),
                })
                .collect(),
        };
        self.units.lock().unwrap().insert(unit.clone(), script);
    }

    /// Parsing `header` in a context with fingerprint `context` yields `actual`
    pub fn set_header_override(
        &self,
        header: &FileKey,
        context: ConditionalFingerprint,
        actual: ConditionalFingerprint,
    ) {
        self.header_overrides
            .lock()
            .unwrap()
            .insert((header.clone(), context), actual);
    }

    pub fn fail(&self, file: &FileKey) {
        self.failing.lock().unwrap().insert(file.clone());
    }

    pub fn recover(&self, file: &FileKey) {
        self.failing.lock().unwrap().remove(file);
    }

    pub fn panic_on(&self, file: &FileKey) {
        self.panicking.lock().unwrap().insert(file.clone());
    }

    /// Run `hook` at the start of every parse, e.g. to edit a file mid-parse
    pub fn set_hook(&self, hook: impl Fn(&ParseRequest<'_>) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn parse_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn parses_of(&self, file: &FileKey) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| &call.file == file)
            .count()
    }

    pub fn calls(&self) -> Vec<ParseCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

impl Parser for ScriptedParser {
    fn parse(&self, request: &ParseRequest<'_>) -> anyhow::Result<ParseOutcome> {
        self.calls.lock().unwrap().push(ParseCall {
            file: request.file.clone(),
            context: request.context.cloned(),
        });

        if self.panicking.lock().unwrap().contains(request.file) {
            panic!("scripted panic while parsing {}", request.file);
        }
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(request);
        }
        if self.failing.lock().unwrap().contains(request.file) {
            anyhow::bail!("scripted failure for {}", request.file);
        }

        let ast = AstHandle(self.next_ast.fetch_add(1, Ordering::Relaxed) + 1);
        let outcome = match request.context {
            Some(context) => {
                let key = (request.file.clone(), context.fingerprint.clone());
                let fingerprint = self
                    .header_overrides
                    .lock()
                    .unwrap()
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| context.fingerprint.clone());
                ParseOutcome {
                    ast,
                    fingerprint,
                    inclusions: Vec::new(),
                }
            }
            None => {
                let script = self
                    .units
                    .lock()
                    .unwrap()
                    .get(request.file)
                    .cloned()
                    .unwrap_or_default();
                ParseOutcome {
                    ast,
                    fingerprint: script.fingerprint,
                    inclusions: script.inclusions,
                }
            }
        };
        Ok(outcome)
    }
}
