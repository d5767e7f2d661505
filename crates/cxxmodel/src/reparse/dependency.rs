//
// reparse/dependency.rs
//
// Project dependency graph for invalidation fan-out
//

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use indexmap::IndexSet;

use super::types::ProjectId;

/// Directed edge: `from` consumes the library `to`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub from: ProjectId,
    pub to: ProjectId,
}

/// Which projects use which libraries.
///
/// Both directions are indexed so that a header change in a library can be
/// fanned out to its consumers without scanning every project.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward lookup: project -> libraries it uses, in declaration order
    forward: HashMap<ProjectId, IndexSet<ProjectId>>,
    /// Reverse lookup: library -> projects that use it
    backward: HashMap<ProjectId, IndexSet<ProjectId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `project -> library`. Returns false for self-edges and duplicates.
    pub fn add_edge(&mut self, project: &ProjectId, library: &ProjectId) -> bool {
        if project == library {
            log::trace!("Ignoring self-edge on project {}", project);
            return false;
        }
        let inserted = self
            .forward
            .entry(project.clone())
            .or_default()
            .insert(library.clone());
        if !inserted {
            return false;
        }
        self.backward
            .entry(library.clone())
            .or_default()
            .insert(project.clone());
        log::trace!("Adding edge: {} -> {}", project, library);
        true
    }

    pub fn remove_edge(&mut self, project: &ProjectId, library: &ProjectId) -> bool {
        let removed = match self.forward.get_mut(project) {
            Some(libs) => {
                let removed = libs.shift_remove(library);
                if libs.is_empty() {
                    self.forward.remove(project);
                }
                removed
            }
            None => false,
        };
        if removed {
            if let Some(users) = self.backward.get_mut(library) {
                users.shift_remove(project);
                if users.is_empty() {
                    self.backward.remove(library);
                }
            }
            log::trace!("Removed edge: {} -> {}", project, library);
        }
        removed
    }

    /// Replace the declared library list of `project`
    pub fn set_libraries(&mut self, project: &ProjectId, libraries: &[ProjectId]) {
        for old in self.libraries_of(project) {
            self.remove_edge(project, &old);
        }
        for library in libraries {
            self.add_edge(project, library);
        }
    }

    /// Drop every edge touching `project`, in either direction
    pub fn remove_project(&mut self, project: &ProjectId) {
        if let Some(libs) = self.forward.remove(project) {
            log::trace!("Removing {} forward edges from {}", libs.len(), project);
            for lib in libs {
                if let Some(users) = self.backward.get_mut(&lib) {
                    users.shift_remove(project);
                    if users.is_empty() {
                        self.backward.remove(&lib);
                    }
                }
            }
        }
        if let Some(users) = self.backward.remove(project) {
            log::trace!("Removing {} backward edges to {}", users.len(), project);
            for user in users {
                if let Some(libs) = self.forward.get_mut(&user) {
                    libs.shift_remove(project);
                    if libs.is_empty() {
                        self.forward.remove(&user);
                    }
                }
            }
        }
    }

    /// Libraries `project` uses, in declaration order
    pub fn libraries_of(&self, project: &ProjectId) -> Vec<ProjectId> {
        self.forward
            .get(project)
            .map(|libs| libs.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Projects that use `library` directly
    pub fn dependents_of(&self, library: &ProjectId) -> HashSet<ProjectId> {
        self.backward
            .get(library)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Projects depending on `library` directly or through at most
    /// `max_depth` library hops, nearest first. `library` itself is not
    /// included. Each project is reached at its shortest distance.
    pub fn transitive_dependents_of(&self, library: &ProjectId, max_depth: usize) -> Vec<ProjectId> {
        let mut result = Vec::new();
        let mut visited: HashSet<ProjectId> = HashSet::from([library.clone()]);
        let mut frontier = vec![library.clone()];
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for project in &frontier {
                let Some(users) = self.backward.get(project) else {
                    continue;
                };
                for user in users {
                    if visited.insert(user.clone()) {
                        result.push(user.clone());
                        next.push(user.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        result
    }

    /// Detect a cycle through `project`. Returns the edge closing it.
    pub fn detect_cycle(&self, project: &ProjectId) -> Option<DependencyEdge> {
        let mut visited = HashSet::new();
        self.detect_cycle_recursive(project, project, &mut visited)
    }

    fn detect_cycle_recursive(
        &self,
        start: &ProjectId,
        current: &ProjectId,
        visited: &mut HashSet<ProjectId>,
    ) -> Option<DependencyEdge> {
        if !visited.insert(current.clone()) {
            return None;
        }
        for lib in self.forward.get(current)? {
            if lib == start {
                return Some(DependencyEdge {
                    from: current.clone(),
                    to: lib.clone(),
                });
            }
            if let Some(edge) = self.detect_cycle_recursive(start, lib, visited) {
                return Some(edge);
            }
        }
        None
    }

    /// All edges, sorted
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<_> = self
            .forward
            .iter()
            .flat_map(|(from, libs)| {
                libs.iter().map(move |to| DependencyEdge {
                    from: from.clone(),
                    to: to.clone(),
                })
            })
            .collect();
        edges.sort();
        edges
    }

    /// Human-readable dump for debugging
    pub fn dump_state(&self) -> String {
        let total_edges: usize = self.forward.values().map(|v| v.len()).sum();
        let mut output = String::new();
        let _ = writeln!(output, "Project Dependency Graph ({} total edges):", total_edges);
        let _ = writeln!(output, "  {} projects using libraries", self.forward.len());
        let _ = writeln!(output, "  {} libraries in use\n", self.backward.len());

        if self.forward.is_empty() {
            output.push_str("  (no edges)\n");
            return output;
        }

        let mut projects: Vec<_> = self.forward.keys().collect();
        projects.sort();
        for project in projects {
            let _ = writeln!(output, "  {}:", project);
            for lib in &self.forward[project] {
                let _ = writeln!(output, "    -> {}", lib);
            }
        }
        output
    }
}
