//! Deterministic fixture workspace generator for benchmarks and tests.
//!
//! Generates synthetic multi-project C/C++ workspaces with controlled
//! characteristics: project count, translation units per project, headers
//! shared from a common library project, and the number of distinct macro
//! configurations those headers are seen in.
//!
//! All output is deterministic, so benchmarks are reproducible.

use crate::reparse::fingerprint::ConditionalFingerprint;
use crate::reparse::model::SourceModel;
use crate::reparse::types::{FileKey, FileKind, ProjectId};

use super::mock_parser::{file, fingerprint, ScriptedParser};

/// Name of the library project every generated project depends on
pub const LIBRARY_PROJECT: &str = "corelib";

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub project_count: usize,
    pub units_per_project: usize,
    pub shared_headers: usize,
    pub headers_per_unit: usize,
    /// Distinct fingerprints a shared header is included with
    pub configurations: usize,
}

impl FixtureConfig {
    /// Small workspace: 3 projects, 5 units each, 4 shared headers.
    pub fn small() -> Self {
        Self {
            project_count: 3,
            units_per_project: 5,
            shared_headers: 4,
            headers_per_unit: 2,
            configurations: 2,
        }
    }

    /// Medium workspace: 10 projects, 20 units each, 20 shared headers.
    pub fn medium() -> Self {
        Self {
            project_count: 10,
            units_per_project: 20,
            shared_headers: 20,
            headers_per_unit: 5,
            configurations: 3,
        }
    }

    /// Large workspace: 40 projects, 50 units each, 100 shared headers.
    pub fn large() -> Self {
        Self {
            project_count: 40,
            units_per_project: 50,
            shared_headers: 100,
            headers_per_unit: 10,
            configurations: 4,
        }
    }
}

/// The files of a generated workspace
#[derive(Debug, Clone, Default)]
pub struct FixtureWorkspace {
    pub projects: Vec<ProjectId>,
    pub units: Vec<FileKey>,
    pub headers: Vec<FileKey>,
}

/// Fingerprint of configuration `index`; configuration 0 compiles everything.
pub fn configuration_fingerprint(index: usize) -> ConditionalFingerprint {
    if index == 0 {
        return ConditionalFingerprint::empty();
    }
    let start = index as u64 * 100;
    fingerprint(&[(start, start + 40)])
}

/// Script `parser` for a workspace and register its files with `model`.
///
/// Unit `u` of project `p` includes `headers_per_unit` consecutive shared
/// headers starting at `p + u`, all in configuration `(p + u) % configurations`.
pub fn populate(config: &FixtureConfig, parser: &ScriptedParser, model: &SourceModel) -> FixtureWorkspace {
    let library = ProjectId::from(LIBRARY_PROJECT);
    let headers: Vec<FileKey> = (0..config.shared_headers)
        .map(|h| file(LIBRARY_PROJECT, &format!("/corelib/include/header_{}.h", h)))
        .collect();
    for header in &headers {
        model.add_file(header, FileKind::Header);
    }

    let mut workspace = FixtureWorkspace {
        headers,
        ..Default::default()
    };
    let configurations = config.configurations.max(1);
    for p in 0..config.project_count {
        let name = format!("project_{}", p);
        let project = ProjectId::from(name.as_str());
        model.set_libraries(&project, &[library.clone()]);

        for u in 0..config.units_per_project {
            let unit = file(&name, &format!("/{}/src/unit_{}.cpp", name, u));
            let seen_as = configuration_fingerprint((p + u) % configurations);
            let inclusions: Vec<_> = if workspace.headers.is_empty() {
                Vec::new()
            } else {
                (0..config.headers_per_unit)
                    .map(|i| {
                        let header = &workspace.headers[(p + u + i) % workspace.headers.len()];
                        (header.clone(), seen_as.clone())
                    })
                    .collect()
            };
            parser.set_unit(&unit, ConditionalFingerprint::empty(), &inclusions);
            model.add_file(&unit, FileKind::TranslationUnit);
            workspace.units.push(unit);
        }
        workspace.projects.push(project);
    }
    workspace
}
