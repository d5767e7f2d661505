//! Reparse scheduler: the blocking priority queue feeding parser workers.
//!
//! Work items live in two segments. The *immediate* segment is drained first,
//! strictly FIFO; it carries edits the user is waiting for. The *normal*
//! segment takes `Head` requests at its front and `Tail` requests at its back,
//! so repeated `Head` requests come out in reverse order.
//!
//! # Coalescing
//! A file is never queued twice and never handed to two workers at once:
//! - A request for a queued file is merged into the queued item (stronger
//!   target, union of contexts). The item moves only if the new priority class
//!   is strictly higher.
//! - A request for a file that a worker is parsing is deferred and queued when
//!   the worker calls [`ReparseScheduler::finish`].
//!
//! # Lifecycle
//! The scheduler starts idle: requests are accepted but nothing is delivered
//! until [`ReparseScheduler::startup`]. [`ReparseScheduler::shutdown`] drops all
//! pending work, cancels the scheduler's token and fails every blocked
//! `dequeue` with [`ReparseError::Cancelled`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::error::ReparseError;
use super::types::{FileKey, InclusionContext, ParseTarget, Priority, ProjectId, WorkItem};

/// Lifecycle state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    ShutDown,
}

/// What happened to an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new queue entry was created
    Enqueued,
    /// Merged into the entry already queued for the file
    Coalesced,
    /// The file is being parsed; the request runs after `finish`
    Deferred,
    /// The scheduler is shut down
    Rejected,
}

/// Counters for diagnostics and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub coalesced: u64,
    pub deferred: u64,
    pub dequeued: u64,
    pub rejected: u64,
}

#[derive(Debug)]
struct Queues {
    state: SchedulerState,
    immediate: VecDeque<WorkItem>,
    normal: VecDeque<WorkItem>,
    /// Files present in either segment
    queued: HashSet<FileKey>,
    in_flight: HashSet<FileKey>,
    deferred: HashMap<FileKey, WorkItem>,
    suspended: usize,
    next_seq: u64,
    token: CancellationToken,
    stats: SchedulerStats,
}

impl Queues {
    fn deliverable(&self) -> bool {
        self.state == SchedulerState::Running && self.suspended == 0
    }

    fn queued_len(&self) -> usize {
        self.immediate.len() + self.normal.len()
    }

    fn is_idle(&self) -> bool {
        self.immediate.is_empty() && self.normal.is_empty() && self.in_flight.is_empty()
    }

    fn place(&mut self, item: WorkItem) {
        self.queued.insert(item.file.clone());
        match item.priority {
            Priority::Immediate => self.immediate.push_back(item),
            Priority::Head => self.normal.push_front(item),
            Priority::Tail => self.normal.push_back(item),
        }
    }

    /// Take the queued item for `file` out of whichever segment holds it
    fn take_queued(&mut self, file: &FileKey) -> Option<WorkItem> {
        if !self.queued.remove(file) {
            return None;
        }
        for segment in [&mut self.immediate, &mut self.normal] {
            if let Some(pos) = segment.iter().position(|item| &item.file == file) {
                return segment.remove(pos);
            }
        }
        None
    }

    fn queued_mut(&mut self, file: &FileKey) -> Option<&mut WorkItem> {
        if !self.queued.contains(file) {
            return None;
        }
        self.immediate
            .iter_mut()
            .chain(self.normal.iter_mut())
            .find(|item| &item.file == file)
    }

    fn pop(&mut self) -> Option<WorkItem> {
        let item = self
            .immediate
            .pop_front()
            .or_else(|| self.normal.pop_front())?;
        self.queued.remove(&item.file);
        self.in_flight.insert(item.file.clone());
        self.stats.dequeued += 1;
        Some(item)
    }

    fn new_item(
        &mut self,
        file: FileKey,
        target: ParseTarget,
        priority: Priority,
        contexts: Vec<InclusionContext>,
    ) -> WorkItem {
        let seq = self.next_seq;
        self.next_seq += 1;
        let mut item = WorkItem {
            file,
            target,
            priority,
            seq,
            contexts: Vec::new(),
        };
        item.absorb(target, contexts);
        item
    }
}

/// Concurrent two-segment priority queue of reparse work.
///
/// Shared by `Arc` between the model (producer) and the worker pool
/// (consumers).
#[derive(Debug)]
pub struct ReparseScheduler {
    inner: Mutex<Queues>,
    /// Signalled when an item may have become deliverable
    available: Condvar,
    /// Signalled when in-flight work finishes or the queue empties
    idle: Condvar,
}

impl Default for ReparseScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReparseScheduler {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Queues {
                state: SchedulerState::Idle,
                immediate: VecDeque::new(),
                normal: VecDeque::new(),
                queued: HashSet::new(),
                in_flight: HashSet::new(),
                deferred: HashMap::new(),
                suspended: 0,
                next_seq: 0,
                token: CancellationToken::new(),
                stats: SchedulerStats::default(),
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// A panicking worker must not wedge the queue, so poisoning is ignored
    fn lock(&self) -> MutexGuard<'_, Queues> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start delivering work. Re-opens the queue after a shutdown.
    pub fn startup(&self) {
        let mut q = self.lock();
        match q.state {
            SchedulerState::Running => return,
            SchedulerState::ShutDown => {
                q.token = CancellationToken::new();
                log::info!("Reparse scheduler restarted");
            }
            SchedulerState::Idle => {
                log::info!(
                    "Reparse scheduler started with {} pending items",
                    q.queued_len()
                );
            }
        }
        q.state = SchedulerState::Running;
        drop(q);
        self.available.notify_all();
    }

    /// Drop all pending work and wake every blocked consumer with `Cancelled`.
    /// With `wait`, also block until in-flight items are finished.
    pub fn shutdown(&self, wait: bool) {
        let mut q = self.lock();
        if q.state != SchedulerState::ShutDown {
            let dropped = q.queued_len() + q.deferred.len();
            q.immediate.clear();
            q.normal.clear();
            q.queued.clear();
            q.deferred.clear();
            q.state = SchedulerState::ShutDown;
            q.token.cancel();
            log::info!(
                "Reparse scheduler shut down, dropped {} pending items ({} in flight)",
                dropped,
                q.in_flight.len()
            );
        }
        self.available.notify_all();
        self.idle.notify_all();

        if wait {
            while !q.in_flight.is_empty() {
                q = self.idle.wait(q).unwrap_or_else(PoisonError::into_inner);
            }
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.lock().state
    }

    /// Token cancelled by the current lifecycle's shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock().token.clone()
    }

    pub fn enqueue(&self, file: FileKey, target: ParseTarget, priority: Priority) -> EnqueueOutcome {
        self.enqueue_with_contexts(file, target, priority, Vec::new())
    }

    /// Request `file` to be brought to `target`, parsing it in `contexts`
    /// (an empty list parses it as its own translation unit).
    pub fn enqueue_with_contexts(
        &self,
        file: FileKey,
        target: ParseTarget,
        priority: Priority,
        contexts: Vec<InclusionContext>,
    ) -> EnqueueOutcome {
        let mut q = self.lock();

        if q.state == SchedulerState::ShutDown {
            q.stats.rejected += 1;
            log::trace!("Rejected reparse of {} after shutdown", file);
            return EnqueueOutcome::Rejected;
        }

        if q.in_flight.contains(&file) {
            q.stats.deferred += 1;
            if let Some(pending) = q.deferred.get_mut(&file) {
                pending.absorb(target, contexts);
                pending.priority = pending.priority.max(priority);
            } else {
                let item = q.new_item(file.clone(), target, priority, contexts);
                q.deferred.insert(file.clone(), item);
            }
            log::trace!("Deferred reparse of {} until its current parse finishes", file);
            return EnqueueOutcome::Deferred;
        }

        if let Some(queued) = q.queued_mut(&file) {
            queued.absorb(target, contexts);
            let upgrade = priority.rank() > queued.priority.rank();
            if upgrade {
                if let Some(mut item) = q.take_queued(&file) {
                    item.priority = priority;
                    q.place(item);
                }
            }
            q.stats.coalesced += 1;
            log::trace!(
                "Coalesced reparse of {} (target={:?}, moved={})",
                file,
                target,
                upgrade
            );
            drop(q);
            if upgrade {
                self.available.notify_one();
            }
            return EnqueueOutcome::Coalesced;
        }

        let item = q.new_item(file, target, priority, contexts);
        log::trace!(
            "Submitted reparse of {} (target={:?}, priority={:?}, seq={}, queue_size={})",
            item.file,
            item.target,
            item.priority,
            item.seq,
            q.queued_len() + 1
        );
        q.place(item);
        q.stats.enqueued += 1;
        drop(q);
        self.available.notify_one();
        EnqueueOutcome::Enqueued
    }

    /// Block until an item is deliverable; fails once shut down.
    pub fn dequeue(&self) -> Result<WorkItem, ReparseError> {
        let mut q = self.lock();
        loop {
            if q.state == SchedulerState::ShutDown {
                return Err(ReparseError::Cancelled);
            }
            if q.deliverable() {
                if let Some(item) = q.pop() {
                    return Ok(item);
                }
            }
            q = self.available.wait(q).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking `dequeue`. `None` while idle, suspended, shut down or empty.
    pub fn try_dequeue(&self) -> Option<WorkItem> {
        let mut q = self.lock();
        if !q.deliverable() {
            return None;
        }
        q.pop()
    }

    /// Report that processing of `item` ended. Returns true if a request that
    /// arrived meanwhile was queued.
    pub fn finish(&self, item: &WorkItem) -> bool {
        let mut q = self.lock();
        q.in_flight.remove(&item.file);
        let requeued = match q.deferred.remove(&item.file) {
            Some(pending) if q.state != SchedulerState::ShutDown => {
                log::trace!("Queued deferred reparse of {}", pending.file);
                q.place(pending);
                true
            }
            _ => false,
        };
        let idle = q.in_flight.is_empty();
        drop(q);
        if requeued {
            self.available.notify_one();
        }
        if idle {
            self.idle.notify_all();
        }
        requeued
    }

    /// Pause delivery. Nested: each call needs a matching `resume`.
    pub fn suspend(&self) {
        let mut q = self.lock();
        q.suspended += 1;
        log::trace!("Reparse scheduler suspended (depth {})", q.suspended);
    }

    pub fn resume(&self) {
        let mut q = self.lock();
        q.suspended = q.suspended.saturating_sub(1);
        let resumed = q.suspended == 0;
        drop(q);
        if resumed {
            log::trace!("Reparse scheduler resumed");
            self.available.notify_all();
        }
    }

    /// Suspend until the returned guard is dropped
    pub fn suspend_guard(&self) -> SuspendGuard<'_> {
        self.suspend();
        SuspendGuard { scheduler: self }
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended > 0
    }

    /// Drop queued and deferred requests for `file`
    pub fn remove(&self, file: &FileKey) -> bool {
        let mut q = self.lock();
        let queued = q.take_queued(file).is_some();
        let deferred = q.deferred.remove(file).is_some();
        if queued {
            log::trace!("Removed queued reparse of {}", file);
        }
        let idle = q.is_idle();
        drop(q);
        if idle {
            self.idle.notify_all();
        }
        queued || deferred
    }

    /// Drop every queued and deferred request of `project`. Returns how many
    /// were dropped.
    pub fn remove_project(&self, project: &ProjectId) -> usize {
        let mut q = self.lock();
        let before = q.queued_len() + q.deferred.len();
        q.immediate.retain(|item| &item.file.project != project);
        q.normal.retain(|item| &item.file.project != project);
        q.queued.retain(|file| &file.project != project);
        q.deferred.retain(|file, _| &file.project != project);
        let removed = before - (q.queued_len() + q.deferred.len());
        if removed > 0 {
            log::debug!("Removed {} pending reparse items of project {}", removed, project);
        }
        let idle = q.is_idle();
        drop(q);
        if idle {
            self.idle.notify_all();
        }
        removed
    }

    /// True if any file of `project` other than `skip` is queued, deferred or
    /// being parsed
    pub fn has_pending_project_work(&self, project: &ProjectId, skip: Option<&FileKey>) -> bool {
        let q = self.lock();
        let relevant = |file: &FileKey| &file.project == project && Some(file) != skip;
        q.immediate.iter().any(|item| relevant(&item.file))
            || q.normal.iter().any(|item| relevant(&item.file))
            || q.deferred.keys().any(|file| relevant(file))
            || q.in_flight.iter().any(|file| relevant(file))
    }

    pub fn is_queued(&self, file: &FileKey) -> bool {
        self.lock().queued.contains(file)
    }

    pub fn is_in_flight(&self, file: &FileKey) -> bool {
        self.lock().in_flight.contains(file)
    }

    /// Number of queued items (deferred requests not included)
    pub fn len(&self) -> usize {
        self.lock().queued_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the queue in delivery order
    pub fn pending(&self) -> Vec<WorkItem> {
        let q = self.lock();
        q.immediate.iter().chain(q.normal.iter()).cloned().collect()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats
    }

    /// Block until nothing is queued or in flight. Returns false on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut q = self.lock();
        loop {
            if q.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .idle
                .wait_timeout(q, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            q = guard;
        }
    }
}

/// Resumes the scheduler when dropped
#[must_use = "the scheduler resumes as soon as the guard is dropped"]
pub struct SuspendGuard<'a> {
    scheduler: &'a ReparseScheduler,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reparse::fingerprint::ConditionalFingerprint;
    use std::sync::Arc;
    use std::thread;

    fn file(n: usize) -> FileKey {
        FileKey::new(ProjectId::from("app"), format!("/src/f{}.cpp", n))
    }

    fn drain(scheduler: &ReparseScheduler) -> Vec<FileKey> {
        let mut out = Vec::new();
        while let Some(item) = scheduler.try_dequeue() {
            scheduler.finish(&item);
            out.push(item.file);
        }
        out
    }

    fn run(requests: &[(usize, Priority)]) -> Vec<FileKey> {
        let scheduler = ReparseScheduler::new();
        for &(n, priority) in requests {
            scheduler.enqueue(file(n), ParseTarget::Parse, priority);
        }
        scheduler.startup();
        drain(&scheduler)
    }

    fn files(ns: &[usize]) -> Vec<FileKey> {
        ns.iter().map(|&n| file(n)).collect()
    }

    #[test]
    fn test_immediate_is_fifo() {
        let order = run(&[
            (0, Priority::Immediate),
            (1, Priority::Immediate),
            (2, Priority::Immediate),
            (3, Priority::Immediate),
        ]);
        assert_eq!(order, files(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_head_is_lifo() {
        let order = run(&[
            (0, Priority::Head),
            (1, Priority::Head),
            (2, Priority::Head),
            (3, Priority::Head),
        ]);
        assert_eq!(order, files(&[3, 2, 1, 0]));
    }

    #[test]
    fn test_tail_is_fifo() {
        let order = run(&[
            (0, Priority::Tail),
            (1, Priority::Tail),
            (2, Priority::Tail),
            (3, Priority::Tail),
        ]);
        assert_eq!(order, files(&[0, 1, 2, 3]));
    }

    #[test]
    fn test_mixed_priorities() {
        let order = run(&[
            (0, Priority::Immediate),
            (1, Priority::Immediate),
            (2, Priority::Head),
            (3, Priority::Tail),
        ]);
        assert_eq!(order, files(&[0, 1, 2, 3]));

        let order = run(&[
            (0, Priority::Tail),
            (1, Priority::Head),
            (2, Priority::Immediate),
            (3, Priority::Immediate),
        ]);
        assert_eq!(order, files(&[2, 3, 1, 0]));
    }

    #[test]
    fn test_coalesce_keeps_position_for_same_or_weaker_priority() {
        let scheduler = ReparseScheduler::new();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        scheduler.enqueue(file(1), ParseTarget::Parse, Priority::Tail);
        assert_eq!(
            scheduler.enqueue(file(0), ParseTarget::Reparse, Priority::Tail),
            EnqueueOutcome::Coalesced
        );
        assert_eq!(scheduler.len(), 2);

        scheduler.startup();
        let first = scheduler.try_dequeue().unwrap();
        assert_eq!(first.file, file(0));
        assert_eq!(first.target, ParseTarget::Reparse);
        assert_eq!(first.seq, 0);
    }

    #[test]
    fn test_coalesce_moves_on_upgrade() {
        let scheduler = ReparseScheduler::new();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        scheduler.enqueue(file(1), ParseTarget::Parse, Priority::Tail);
        scheduler.enqueue(file(2), ParseTarget::Parse, Priority::Immediate);
        assert_eq!(
            scheduler.enqueue(file(1), ParseTarget::PartialReparse, Priority::Immediate),
            EnqueueOutcome::Coalesced
        );
        // A weaker request never demotes
        scheduler.enqueue(file(2), ParseTarget::Parse, Priority::Tail);

        let pending = scheduler.pending();
        assert_eq!(
            pending.iter().map(|i| i.file.clone()).collect::<Vec<_>>(),
            files(&[2, 1, 0])
        );
        assert_eq!(pending[1].priority, Priority::Immediate);
        assert_eq!(pending[1].target, ParseTarget::PartialReparse);
        assert_eq!(pending[1].seq, 1);
        assert_eq!(scheduler.stats().coalesced, 2);
    }

    #[test]
    fn test_coalesce_merges_contexts() {
        let scheduler = ReparseScheduler::new();
        let header = file(9);
        let project = ProjectId::from("app");
        let a = InclusionContext::new(project.clone(), ConditionalFingerprint::empty());
        let b = InclusionContext::new(
            project,
            ConditionalFingerprint::from_intervals(&[(1, 2)]).unwrap(),
        );
        scheduler.enqueue_with_contexts(header.clone(), ParseTarget::Parse, Priority::Head, vec![a.clone()]);
        scheduler.enqueue_with_contexts(
            header,
            ParseTarget::Parse,
            Priority::Head,
            vec![b.clone(), a.clone()],
        );
        let pending = scheduler.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].contexts, vec![a, b]);
    }

    #[test]
    fn test_request_for_in_flight_file_is_deferred() {
        let scheduler = ReparseScheduler::new();
        scheduler.startup();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        let item = scheduler.try_dequeue().unwrap();
        assert!(scheduler.is_in_flight(&file(0)));

        assert_eq!(
            scheduler.enqueue(file(0), ParseTarget::PartialReparse, Priority::Tail),
            EnqueueOutcome::Deferred
        );
        assert_eq!(
            scheduler.enqueue(file(0), ParseTarget::Reparse, Priority::Immediate),
            EnqueueOutcome::Deferred
        );
        assert!(!scheduler.is_queued(&file(0)));
        assert!(scheduler.try_dequeue().is_none());

        assert!(scheduler.finish(&item));
        let again = scheduler.try_dequeue().unwrap();
        assert_eq!(again.file, file(0));
        assert_eq!(again.target, ParseTarget::Reparse);
        assert_eq!(again.priority, Priority::Immediate);
        assert!(!scheduler.finish(&again));
    }

    #[test]
    fn test_idle_scheduler_accepts_but_does_not_deliver() {
        let scheduler = ReparseScheduler::new();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        assert!(scheduler.try_dequeue().is_none());
        scheduler.startup();
        assert!(scheduler.try_dequeue().is_some());
    }

    #[test]
    fn test_suspend_resume_nests() {
        let scheduler = ReparseScheduler::new();
        scheduler.startup();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        scheduler.suspend();
        {
            let _guard = scheduler.suspend_guard();
            assert!(scheduler.try_dequeue().is_none());
        }
        assert!(scheduler.is_suspended());
        assert!(scheduler.try_dequeue().is_none());
        scheduler.resume();
        assert!(!scheduler.is_suspended());
        assert!(scheduler.try_dequeue().is_some());
    }

    #[test]
    fn test_resume_wakes_blocked_dequeue() {
        let scheduler = Arc::new(ReparseScheduler::new());
        scheduler.startup();
        scheduler.suspend();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);

        let consumer = {
            let scheduler = scheduler.clone();
            thread::spawn(move || scheduler.dequeue().map(|item| item.file))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(scheduler.len(), 1);
        scheduler.resume();
        assert_eq!(consumer.join().unwrap().unwrap(), file(0));
    }

    #[test]
    fn test_shutdown_cancels_blocked_dequeue() {
        let scheduler = Arc::new(ReparseScheduler::new());
        scheduler.startup();
        let token = scheduler.cancellation_token();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let scheduler = scheduler.clone();
                thread::spawn(move || scheduler.dequeue())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        scheduler.shutdown(false);

        for consumer in consumers {
            assert!(consumer.join().unwrap().unwrap_err().is_cancelled());
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_shutdown_drops_pending_and_rejects_new_work() {
        let scheduler = ReparseScheduler::new();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        scheduler.shutdown(true);
        assert!(scheduler.is_empty());
        assert_eq!(
            scheduler.enqueue(file(1), ParseTarget::Parse, Priority::Tail),
            EnqueueOutcome::Rejected
        );
        assert_eq!(scheduler.stats().rejected, 1);
    }

    #[test]
    fn test_queued_index_follows_every_removal() {
        let scheduler = ReparseScheduler::new();
        let header = FileKey::new(ProjectId::from("lib"), "/lib/a.h");
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        scheduler.enqueue(file(1), ParseTarget::Parse, Priority::Tail);
        scheduler.enqueue(header.clone(), ParseTarget::Parse, Priority::Tail);
        // Promotion moves the item between segments
        scheduler.enqueue(file(0), ParseTarget::Reparse, Priority::Immediate);
        assert!(scheduler.is_queued(&file(0)));
        assert_eq!(scheduler.len(), 3);

        assert_eq!(scheduler.remove_project(&ProjectId::from("lib")), 1);
        assert!(!scheduler.is_queued(&header));

        scheduler.startup();
        let item = scheduler.try_dequeue().unwrap();
        assert_eq!(item.file, file(0));
        assert!(!scheduler.is_queued(&file(0)));
        scheduler.finish(&item);

        assert!(scheduler.remove(&file(1)));
        assert!(!scheduler.is_queued(&file(1)));
        assert_eq!(
            scheduler.enqueue(file(1), ParseTarget::Parse, Priority::Tail),
            EnqueueOutcome::Enqueued
        );
        scheduler.shutdown(false);
        assert!(!scheduler.is_queued(&file(1)));
    }

    #[test]
    fn test_startup_after_shutdown_uses_fresh_token() {
        let scheduler = ReparseScheduler::new();
        scheduler.startup();
        let old = scheduler.cancellation_token();
        scheduler.shutdown(false);
        scheduler.startup();
        assert!(old.is_cancelled());
        assert!(!scheduler.cancellation_token().is_cancelled());
        assert_eq!(
            scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail),
            EnqueueOutcome::Enqueued
        );
        assert!(scheduler.try_dequeue().is_some());
    }

    #[test]
    fn test_shutdown_wait_blocks_until_finish() {
        let scheduler = Arc::new(ReparseScheduler::new());
        scheduler.startup();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        let item = scheduler.try_dequeue().unwrap();

        let worker = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                scheduler.finish(&item)
            })
        };
        scheduler.shutdown(true);
        assert!(!scheduler.is_in_flight(&file(0)));
        assert!(!worker.join().unwrap());
    }

    #[test]
    fn test_remove_and_remove_project() {
        let scheduler = ReparseScheduler::new();
        let lib = FileKey::new(ProjectId::from("lib"), "/lib/a.cpp");
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        scheduler.enqueue(file(1), ParseTarget::Parse, Priority::Immediate);
        scheduler.enqueue(lib.clone(), ParseTarget::Parse, Priority::Head);

        assert!(scheduler.remove(&file(0)));
        assert!(!scheduler.remove(&file(0)));
        assert_eq!(scheduler.remove_project(&ProjectId::from("app")), 1);
        assert_eq!(scheduler.pending().len(), 1);
        assert!(scheduler.is_queued(&lib));
    }

    #[test]
    fn test_has_pending_project_work() {
        let scheduler = ReparseScheduler::new();
        let app = ProjectId::from("app");
        assert!(!scheduler.has_pending_project_work(&app, None));
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        assert!(scheduler.has_pending_project_work(&app, None));
        assert!(!scheduler.has_pending_project_work(&app, Some(&file(0))));
        assert!(!scheduler.has_pending_project_work(&ProjectId::from("lib"), None));

        scheduler.startup();
        let _item = scheduler.try_dequeue().unwrap();
        assert!(scheduler.has_pending_project_work(&app, None));
    }

    #[test]
    fn test_wait_until_idle() {
        let scheduler = Arc::new(ReparseScheduler::new());
        assert!(scheduler.wait_until_idle(Duration::from_millis(1)));
        scheduler.startup();
        scheduler.enqueue(file(0), ParseTarget::Parse, Priority::Tail);
        assert!(!scheduler.wait_until_idle(Duration::from_millis(10)));

        let worker = {
            let scheduler = scheduler.clone();
            thread::spawn(move || {
                let item = scheduler.dequeue().unwrap();
                scheduler.finish(&item);
            })
        };
        assert!(scheduler.wait_until_idle(Duration::from_secs(5)));
        worker.join().unwrap();
    }
}
