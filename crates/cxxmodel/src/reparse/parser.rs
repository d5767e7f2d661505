//
// reparse/parser.rs
//
// Interface to the external C/C++ parser
//

use super::fingerprint::ConditionalFingerprint;
use super::types::{AstHandle, FileKey, InclusionContext, ParseTarget};

/// What a worker asks the parser to do
#[derive(Debug, Clone, Copy)]
pub struct ParseRequest<'a> {
    pub file: &'a FileKey,
    pub target: ParseTarget,
    /// Macro-visibility context to parse a header in; `None` parses the file
    /// as its own translation unit
    pub context: Option<&'a InclusionContext>,
}

/// One header reached while parsing a translation unit, with the fingerprint
/// it had at that inclusion site
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub header: FileKey,
    pub fingerprint: ConditionalFingerprint,
}

/// Everything the model needs back from a parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub ast: AstHandle,
    /// Excluded ranges of the parsed file itself
    pub fingerprint: ConditionalFingerprint,
    /// Headers included (directly or transitively) by a translation unit.
    /// Ignored for header parses.
    pub inclusions: Vec<Inclusion>,
}

/// The lexer, preprocessor and AST builder.
///
/// Called from worker threads; implementations must be thread-safe.
pub trait Parser: Send + Sync {
    fn parse(&self, request: &ParseRequest<'_>) -> anyhow::Result<ParseOutcome>;
}
