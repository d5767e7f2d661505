//
// reparse/worker.rs
//
// Bounded pool of parser threads draining the reparse scheduler
//

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::model::SourceModel;
use super::parser::Parser;

/// Parser worker threads looping `dequeue -> process -> finish`.
///
/// Dropping the pool shuts the scheduler down without waiting for the
/// threads.
pub struct ParserWorkerPool {
    model: Arc<SourceModel>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ParserWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserWorkerPool")
            .field("workers", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl ParserWorkerPool {
    /// Start the scheduler and spawn `worker_count` threads (at least one)
    pub fn start(
        model: Arc<SourceModel>,
        parser: Arc<dyn Parser>,
        worker_count: usize,
    ) -> io::Result<Self> {
        let worker_count = worker_count.max(1);
        model.scheduler().startup();

        let mut handles = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_model = model.clone();
            let worker_parser = parser.clone();
            let spawned = thread::Builder::new()
                .name(format!("cxxmodel-parser-{}", index))
                .spawn(move || run_worker(index, &worker_model, worker_parser.as_ref()));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    model.scheduler().shutdown(false);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        log::info!("Started {} parser workers", worker_count);

        Ok(Self { model, handles })
    }

    /// Start with the worker count from the model's configuration
    pub fn start_configured(model: Arc<SourceModel>, parser: Arc<dyn Parser>) -> io::Result<Self> {
        let worker_count = model.config().worker_count;
        Self::start(model, parser, worker_count)
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Shut the scheduler down and join the threads. With `wait`, in-flight
    /// items are finished before the scheduler reports shutdown.
    pub fn shutdown(mut self, wait: bool) {
        self.stop(wait);
    }

    fn stop(&mut self, wait: bool) {
        if self.handles.is_empty() {
            return;
        }
        self.model.scheduler().shutdown(wait);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Parser worker thread panicked");
            }
        }
        log::info!("Parser workers stopped");
    }
}

impl Drop for ParserWorkerPool {
    fn drop(&mut self) {
        self.stop(false);
    }
}

fn run_worker(index: usize, model: &SourceModel, parser: &dyn Parser) {
    log::trace!("Parser worker {} started", index);
    loop {
        let item = match model.scheduler().dequeue() {
            Ok(item) => item,
            Err(err) => {
                log::trace!("Parser worker {} exiting: {}", index, err);
                break;
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| model.process(&item, parser)));
        match result {
            Ok(Ok(report)) => log::trace!(
                "Worker {} processed {} ({} parsed, {} reused, {} queued)",
                index,
                item.file,
                report.parsed,
                report.reused,
                report.scheduled.len()
            ),
            // Already logged by the model
            Ok(Err(_)) => {}
            Err(_) => {
                log::error!("Parser panicked while processing {}", item.file);
                model.mark_failed(&item.file);
            }
        }
        model.finish(&item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reparse::config::ReparseConfig;
    use crate::reparse::types::{FileKind, FileState};
    use crate::test_utils::mock_parser::{file, ScriptedParser};
    use std::time::Duration;

    #[test]
    fn test_pool_parses_queued_files() {
        let _ = env_logger::builder().is_test(true).try_init();
        let model = Arc::new(SourceModel::new(ReparseConfig::default()));
        let parser = Arc::new(ScriptedParser::new());
        let files: Vec<_> = (0..20)
            .map(|i| file("app", &format!("/src/f{}.cpp", i)))
            .collect();
        for f in &files {
            model.add_file(f, FileKind::TranslationUnit);
        }

        let pool = ParserWorkerPool::start(model.clone(), parser.clone(), 4).unwrap();
        assert_eq!(pool.worker_count(), 4);
        assert!(model.scheduler().wait_until_idle(Duration::from_secs(10)));
        pool.shutdown(true);

        for f in &files {
            assert_eq!(model.file_state(f), Some(FileState::Parsed));
        }
        assert_eq!(parser.parse_count(), files.len());
    }

    #[test]
    fn test_parser_panic_does_not_kill_worker() {
        let model = Arc::new(SourceModel::new(ReparseConfig::default()));
        let parser = Arc::new(ScriptedParser::new());
        let bad = file("app", "/src/bad.cpp");
        let good = file("app", "/src/good.cpp");
        parser.panic_on(&bad);
        model.add_file(&bad, FileKind::TranslationUnit);
        model.add_file(&good, FileKind::TranslationUnit);

        let pool = ParserWorkerPool::start(model.clone(), parser.clone(), 1).unwrap();
        assert!(model.scheduler().wait_until_idle(Duration::from_secs(10)));
        drop(pool);

        assert_eq!(model.file_state(&good), Some(FileState::Parsed));
        assert!(!model.scheduler().is_in_flight(&bad));
    }

    #[test]
    fn test_configured_worker_count() {
        let settings = serde_json::json!({ "reparse": { "workerCount": 3 } });
        let config = crate::reparse::config::parse_reparse_config(&settings).unwrap();
        let model = Arc::new(SourceModel::new(config));
        let parser = Arc::new(ScriptedParser::new());
        let unit = file("app", "/src/main.cpp");
        model.add_file(&unit, FileKind::TranslationUnit);

        let pool = ParserWorkerPool::start_configured(model.clone(), parser).unwrap();
        assert_eq!(pool.worker_count(), 3);
        assert!(model.scheduler().wait_until_idle(Duration::from_secs(10)));
        pool.shutdown(true);
        assert_eq!(model.file_state(&unit), Some(FileState::Parsed));
    }

    #[test]
    fn test_shutdown_stops_idle_workers() {
        let model = Arc::new(SourceModel::new(ReparseConfig::default()));
        let parser = Arc::new(ScriptedParser::new());
        let pool = ParserWorkerPool::start(model.clone(), parser, 2).unwrap();
        pool.shutdown(false);
        assert_eq!(
            model.add_file(&file("app", "/src/late.cpp"), FileKind::TranslationUnit),
            crate::reparse::scheduler::EnqueueOutcome::Rejected
        );
    }
}
