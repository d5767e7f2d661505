//
// reparse/model.rs
//
// Source model: ties edits, the scheduler, the inclusion cache and the
// project graph together
//

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::config::ReparseConfig;
use super::coverage::{classify_edit, EditImpact};
use super::dependency::DependencyGraph;
use super::error::ReparseError;
use super::file_registry::{FileRegistry, ParseCompletion, SourceFile, StaleMark};
use super::fingerprint::ConditionalFingerprint;
use super::inclusion_cache::{HeaderModelVariant, InclusionCache};
use super::parser::{ParseRequest, Parser};
use super::scheduler::{EnqueueOutcome, ReparseScheduler, SuspendGuard};
use super::types::{
    AstHandle, FileKey, FileKind, FileState, InclusionContext, ParseTarget, Priority, ProjectId,
    WorkItem,
};

/// What one worker step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Calls into the parser
    pub parsed: usize,
    /// Inclusion contexts served by an existing variant
    pub reused: usize,
    /// New header variants
    pub created_variants: usize,
    /// Files queued as a consequence, in scheduling order
    pub scheduled: Vec<FileKey>,
    /// Inclusion contexts that lost their last includer
    pub dropped_contexts: Vec<InclusionContext>,
    /// The file changed during the parse and the result was thrown away
    pub discarded: bool,
}

impl ProcessReport {
    fn push_scheduled(&mut self, file: &FileKey) {
        if !self.scheduled.contains(file) {
            self.scheduled.push(file.clone());
        }
    }
}

/// The incremental source model.
///
/// Producers (the document layer, project configuration) call the `on_*` and
/// `add_*` methods; parser workers call [`SourceModel::process`] and
/// [`SourceModel::finish`] for every item they dequeue.
#[derive(Debug)]
pub struct SourceModel {
    config: ReparseConfig,
    scheduler: Arc<ReparseScheduler>,
    cache: InclusionCache,
    graph: RwLock<DependencyGraph>,
    files: FileRegistry,
}

impl SourceModel {
    pub fn new(config: ReparseConfig) -> Self {
        Self::with_scheduler(config, Arc::new(ReparseScheduler::new()))
    }

    pub fn with_scheduler(config: ReparseConfig, scheduler: Arc<ReparseScheduler>) -> Self {
        let cache = InclusionCache::new(config.retired_variant_capacity);
        Self {
            config,
            scheduler,
            cache,
            graph: RwLock::new(DependencyGraph::new()),
            files: FileRegistry::new(),
        }
    }

    pub fn config(&self) -> &ReparseConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<ReparseScheduler> {
        &self.scheduler
    }

    pub fn cache(&self) -> &InclusionCache {
        &self.cache
    }

    pub fn graph(&self) -> &RwLock<DependencyGraph> {
        &self.graph
    }

    pub fn file(&self, file: &FileKey) -> Option<SourceFile> {
        self.files.get(file)
    }

    pub fn file_state(&self, file: &FileKey) -> Option<FileState> {
        self.files.state(file)
    }

    pub fn fingerprint_of(&self, file: &FileKey) -> Option<ConditionalFingerprint> {
        self.files.fingerprint(file)
    }

    pub fn files_of(&self, project: &ProjectId) -> Vec<FileKey> {
        self.files.files_of(project)
    }

    /// Inclusion contexts in which `header` currently participates
    pub fn inclusion_contexts(&self, header: &FileKey) -> HashMap<ProjectId, HashSet<InclusionContext>> {
        self.cache.included_contexts_of(header)
    }

    /// Replace the libraries `project` uses
    pub fn set_libraries(&self, project: &ProjectId, libraries: &[ProjectId]) {
        if let Ok(mut graph) = self.graph.write() {
            graph.set_libraries(project, libraries);
            if let Some(edge) = graph.detect_cycle(project) {
                log::warn!(
                    "Project dependency cycle through {} (closed by {} -> {})",
                    project,
                    edge.from,
                    edge.to
                );
            }
        }
    }

    /// Pause parsing until the guard is dropped (multi-file edits, undo)
    pub fn batch(&self) -> SuspendGuard<'_> {
        self.scheduler.suspend_guard()
    }

    /// A file was discovered
    pub fn add_file(&self, file: &FileKey, kind: FileKind) -> EnqueueOutcome {
        if self.files.register(file, kind) {
            log::trace!("Registered {:?} {}", kind, file);
        }
        self.enqueue(file, ParseTarget::Parse, Priority::Tail, Vec::new())
    }

    /// The text of `file` changed in the byte range `[from, to)` of its last
    /// parsed version. Returns the files queued because of it.
    pub fn on_text_edited(&self, file: &FileKey, from: u64, to: u64) -> Vec<FileKey> {
        let Some(record) = self.files.get(file) else {
            log::debug!("Ignoring edit of unknown file {}", file);
            return Vec::new();
        };
        let target = if record.parse_count == 0 {
            ParseTarget::Parse
        } else {
            match classify_edit(&record.fingerprint, from, to) {
                EditImpact::LiveOnly => ParseTarget::PartialReparse,
                EditImpact::TouchesExcluded | EditImpact::Indeterminate => ParseTarget::Reparse,
            }
        };
        log::trace!("Edit of {} at [{}, {}) -> {:?}", file, from, to, target);
        if self.files.mark_stale(file) == StaleMark::WasParsing {
            log::trace!("{} edited while parsing; the running parse will be discarded", file);
        }
        self.invalidate_file(file, record.kind, target, Priority::Immediate)
    }

    /// The file changed on disk
    pub fn on_file_changed(&self, file: &FileKey) -> Vec<FileKey> {
        let Some(kind) = self.files.kind(file) else {
            log::debug!("Ignoring change of unknown file {}", file);
            return Vec::new();
        };
        self.files.mark_stale(file);
        self.invalidate_file(file, kind, ParseTarget::Reparse, Priority::Head)
    }

    fn invalidate_file(
        &self,
        file: &FileKey,
        kind: FileKind,
        target: ParseTarget,
        priority: Priority,
    ) -> Vec<FileKey> {
        let mut scheduled = Vec::new();
        if kind == FileKind::Header {
            scheduled = self.fan_out(file, true);
        }
        // A header nobody includes is parsed on its own
        if scheduled.is_empty() && self.enqueue_accepted(file, target, priority, Vec::new()) {
            scheduled.push(file.clone());
        }
        scheduled
    }

    /// The file was deleted or excluded from its project
    pub fn remove_file(&self, file: &FileKey) {
        let Some(record) = self.files.mark_removed(file) else {
            return;
        };
        self.scheduler.remove(file);
        if record.kind == FileKind::Header {
            self.fan_out(file, false);
        }
        for header in &record.included_headers {
            self.cache.forget_includer(header, &file.project, file);
        }
        self.files.remove(file);
        log::debug!("Removed {}", file);
    }

    /// Forget everything about `project`
    pub fn close_project(&self, project: &ProjectId) {
        let dropped = self.scheduler.remove_project(project);
        self.cache.remove_project(project);
        if let Ok(mut graph) = self.graph.write() {
            graph.remove_project(project);
        }
        let files = self.files.remove_project(project);
        log::info!(
            "Closed project {} ({} files, {} pending items dropped)",
            project,
            files.len(),
            dropped
        );
    }

    /// Invalidate every cached variant of `header` and queue one clean
    /// reparse for every project that held a context of it.
    ///
    /// The queued file is an includer of the stale context, which re-reports
    /// the header with its new fingerprint. With `reattach`, the includers
    /// stay attached to the (now pending) context.
    ///
    /// The header's own project and its dependents within
    /// `max_fan_out_depth` go first, at `Head`, nearest first. Projects that
    /// reach the header some other way (through an intermediate library or
    /// without declaring the dependency) are still consumers and get their
    /// reparse at `Tail`.
    fn fan_out(&self, header: &FileKey, reattach: bool) -> Vec<FileKey> {
        let stale = self.cache.invalidate(header);
        if stale.is_empty() {
            return Vec::new();
        }

        let owner = &header.project;
        let mut ranked: Vec<ProjectId> = vec![owner.clone()];
        if let Ok(graph) = self.graph.read() {
            ranked.extend(graph.transitive_dependents_of(owner, self.config.max_fan_out_depth));
        }

        // First live includer per project, in invalidation order
        let mut candidates: IndexMap<ProjectId, FileKey> = IndexMap::new();
        for inclusion in &stale {
            let project = &inclusion.context.project;
            let includers: Vec<&FileKey> = inclusion
                .includers
                .iter()
                .filter(|f| self.files.contains(f))
                .collect();
            if reattach {
                for includer in &includers {
                    self.cache.observe(header, &inclusion.context, includer);
                }
            }
            if let Some(includer) = includers.first() {
                candidates
                    .entry(project.clone())
                    .or_insert_with(|| (*includer).clone());
            }
        }

        let rank = |project: &ProjectId| ranked.iter().position(|p| p == project);
        // Head pushes to the front, so the nearest project is enqueued last
        let mut order: Vec<(ProjectId, FileKey)> = candidates.into_iter().collect();
        order.sort_by_key(|(project, _)| Reverse(rank(project)));

        let token = self.scheduler.cancellation_token();
        let mut scheduled = Vec::new();
        for (project, includer) in order {
            if token.is_cancelled() {
                break;
            }
            let priority = match rank(&project) {
                Some(_) => Priority::Head,
                None => {
                    log::trace!(
                        "{} reaches {} outside its declared libraries; reparsing at tail",
                        project,
                        header
                    );
                    Priority::Tail
                }
            };
            if self.files.mark_stale(&includer) == StaleMark::Unknown {
                continue;
            }
            if self.enqueue_accepted(&includer, ParseTarget::Reparse, priority, Vec::new()) {
                scheduled.push(includer);
            }
        }

        log::debug!(
            "Fanned out change of {} to {} projects: {:?}",
            header,
            scheduled.len(),
            scheduled
        );
        scheduled
    }

    fn enqueue(
        &self,
        file: &FileKey,
        target: ParseTarget,
        priority: Priority,
        contexts: Vec<InclusionContext>,
    ) -> EnqueueOutcome {
        let outcome = self
            .scheduler
            .enqueue_with_contexts(file.clone(), target, priority, contexts);
        if matches!(outcome, EnqueueOutcome::Enqueued | EnqueueOutcome::Coalesced) {
            self.files.mark_queued(file);
        }
        outcome
    }

    fn enqueue_accepted(
        &self,
        file: &FileKey,
        target: ParseTarget,
        priority: Priority,
        contexts: Vec<InclusionContext>,
    ) -> bool {
        self.enqueue(file, target, priority, contexts) != EnqueueOutcome::Rejected
    }

    /// Run one work item through `parser` and fold the result into the model.
    ///
    /// The caller must call [`SourceModel::finish`] afterwards, whatever the
    /// result.
    pub fn process(&self, item: &WorkItem, parser: &dyn Parser) -> Result<ProcessReport, ReparseError> {
        if !self.files.begin_parse(&item.file) {
            log::debug!("Skipping {}: not registered", item.file);
            return Ok(ProcessReport::default());
        }
        if item.is_unit_parse() {
            self.process_unit(item, parser)
        } else {
            self.process_header(item, parser)
        }
    }

    /// The worker is done with `item`
    pub fn finish(&self, item: &WorkItem) {
        if self.scheduler.finish(item) {
            self.files.mark_queued(&item.file);
        }
    }

    /// Leave `file` stale after a parse that ended abnormally
    pub fn mark_failed(&self, file: &FileKey) {
        self.files.fail_parse(file);
    }

    /// Process queued items on the calling thread until none is deliverable
    pub fn process_pending(&self, parser: &dyn Parser) -> Vec<Result<ProcessReport, ReparseError>> {
        let mut results = Vec::new();
        while let Some(item) = self.scheduler.try_dequeue() {
            results.push(self.process(&item, parser));
            self.finish(&item);
        }
        results
    }

    fn process_unit(&self, item: &WorkItem, parser: &dyn Parser) -> Result<ProcessReport, ReparseError> {
        let file = &item.file;
        let request = ParseRequest {
            file,
            target: item.target,
            context: None,
        };
        let outcome = parser
            .parse(&request)
            .map_err(|err| self.parse_failed(file, err))?;

        let mut report = ProcessReport {
            parsed: 1,
            ..Default::default()
        };

        // One inclusion per header; the first reported fingerprint wins
        let mut inclusions: IndexMap<FileKey, ConditionalFingerprint> = IndexMap::new();
        for inclusion in outcome.inclusions {
            inclusions
                .entry(inclusion.header)
                .or_insert(inclusion.fingerprint);
        }
        let headers: BTreeSet<FileKey> = inclusions.keys().cloned().collect();

        let token = self.scheduler.cancellation_token();
        let previous_headers =
            match self
                .files
                .complete_parse(file, outcome.fingerprint, outcome.ast, Some(headers.clone()))
            {
                ParseCompletion::Stored { previous_headers } => previous_headers,
                ParseCompletion::Discarded => {
                    log::debug!("Discarding parse of {}: modified while parsing", file);
                    report.discarded = true;
                    if !token.is_cancelled()
                        && self.enqueue_accepted(file, item.target, item.priority, Vec::new())
                    {
                        report.push_scheduled(file);
                    }
                    return Ok(report);
                }
                ParseCompletion::Unknown => return Ok(report),
            };

        for (header, fingerprint) in inclusions {
            self.files.register(&header, FileKind::Header);
            let context = InclusionContext::new(file.project.clone(), fingerprint);
            let observation = self.cache.observe(&header, &context, file);
            report.dropped_contexts.extend(observation.dropped);

            if self.config.smart_headers {
                if observation.variant.is_some() {
                    report.reused += 1;
                    continue;
                }
                if self.config.reuse_covering_variants {
                    if let Some(covering) = self.cache.lookup_covering(&header, &context.fingerprint) {
                        log::trace!(
                            "Reusing covering variant {:?} of {} for {}",
                            covering.id,
                            header,
                            context
                        );
                        self.cache.record(&header, &context, covering);
                        report.reused += 1;
                        continue;
                    }
                }
            }

            if token.is_cancelled() {
                continue;
            }
            if self.enqueue_accepted(
                &header,
                ParseTarget::Parse,
                self.config.include_priority,
                vec![context],
            ) {
                report.push_scheduled(&header);
            }
        }

        for gone in previous_headers.difference(&headers) {
            report
                .dropped_contexts
                .extend(self.cache.forget_includer(gone, &file.project, file));
        }

        log::trace!(
            "Parsed {}: {} inclusions, {} reused, {} queued",
            file,
            headers.len(),
            report.reused,
            report.scheduled.len()
        );
        Ok(report)
    }

    fn process_header(&self, item: &WorkItem, parser: &dyn Parser) -> Result<ProcessReport, ReparseError> {
        let header = &item.file;
        let token = self.scheduler.cancellation_token();
        let mut report = ProcessReport::default();

        // Contexts still waiting for a variant ride along with this item
        let mut groups: IndexMap<ConditionalFingerprint, Vec<InclusionContext>> = IndexMap::new();
        let pending = self.cache.pending_contexts(header);
        for context in item.contexts.iter().chain(pending.iter()) {
            if !self.cache.has_context(header, context) {
                log::trace!("Skipping vanished context {} of {}", context, header);
                continue;
            }
            let group = groups.entry(context.fingerprint.clone()).or_default();
            if !group.contains(context) {
                group.push(context.clone());
            }
        }

        let mut latest: Option<(ConditionalFingerprint, AstHandle)> = None;
        for (fingerprint, group) in groups {
            if self.config.smart_headers {
                if let Some(variant) = self.cache.lookup_fingerprint(header, &fingerprint) {
                    for context in &group {
                        self.record_variant(header, context, variant.clone(), &mut report);
                    }
                    report.reused += group.len();
                    latest = Some((variant.fingerprint.clone(), variant.ast));
                    continue;
                }
            }

            let batches: Vec<Vec<InclusionContext>> = if self.config.smart_headers {
                vec![group]
            } else {
                group.into_iter().map(|context| vec![context]).collect()
            };

            for batch in batches {
                let request = ParseRequest {
                    file: header,
                    target: item.target,
                    context: batch.first(),
                };
                let outcome = parser
                    .parse(&request)
                    .map_err(|err| self.parse_failed(header, err))?;
                report.parsed += 1;
                latest = Some((outcome.fingerprint.clone(), outcome.ast));

                let variant =
                    HeaderModelVariant::new(header.clone(), outcome.fingerprint.clone(), outcome.ast);
                for context in &batch {
                    self.record_variant(header, context, variant.clone(), &mut report);
                }
                if outcome.fingerprint != fingerprint {
                    // The includers saw other macros than the header parse did;
                    // they report the header again, hitting this variant
                    log::debug!(
                        "{} parsed to {} instead of {}; requeueing its includers",
                        header,
                        outcome.fingerprint,
                        fingerprint
                    );
                    for context in &batch {
                        self.requeue_includers(header, context, &token, &mut report);
                    }
                }
            }
        }

        let Some((fingerprint, ast)) = latest else {
            self.files.abandon_parse(header);
            return Ok(report);
        };
        if self.files.complete_parse(header, fingerprint, ast, None) == ParseCompletion::Discarded {
            log::debug!("Discarding variants of {}: modified while parsing", header);
            report.discarded = true;
            if !token.is_cancelled() {
                for file in self.fan_out(header, true) {
                    report.push_scheduled(&file);
                }
            }
        }
        Ok(report)
    }

    fn record_variant(
        &self,
        header: &FileKey,
        context: &InclusionContext,
        variant: Arc<HeaderModelVariant>,
        report: &mut ProcessReport,
    ) {
        let outcome = self.cache.record(header, context, variant);
        if outcome.created {
            report.created_variants += 1;
        }
        if outcome.replaced.is_some() {
            let token = self.scheduler.cancellation_token();
            self.requeue_includers(header, context, &token, report);
        }
    }

    fn requeue_includers(
        &self,
        header: &FileKey,
        context: &InclusionContext,
        token: &tokio_util::sync::CancellationToken,
        report: &mut ProcessReport,
    ) {
        if token.is_cancelled() {
            return;
        }
        for includer in self.cache.includers_of(header, context) {
            if self.files.mark_stale(&includer) == StaleMark::Unknown {
                continue;
            }
            if self.enqueue_accepted(&includer, ParseTarget::Reparse, Priority::Tail, Vec::new()) {
                report.push_scheduled(&includer);
            }
        }
    }

    fn parse_failed(&self, file: &FileKey, err: anyhow::Error) -> ReparseError {
        log::warn!("Failed to parse {}: {:#}", file, err);
        self.files.fail_parse(file);
        ReparseError::parse_failed(file, err)
    }
}
