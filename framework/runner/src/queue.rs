use std::collections::VecDeque;
use std::sync::Arc;

use cohort_core::prelude::CancelHandle;
use parking_lot::{Condvar, Mutex};

use crate::model::{Run, SimulationDefinition};
use crate::monitor::start_monitor;
use crate::observer::RunObserver;
use crate::orchestrator::RunOrchestrator;
use crate::persistence::Persistence;
use crate::types::HarnessResult;

struct QueuedRun {
    run: Run,
    definition: SimulationDefinition,
    /// Originating schedule, carried alongside the run because it is not persisted on it.
    schedule_id: Option<String>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedRun>,
    stop: bool,
    consumer_alive: bool,
    /// Cancel handle of the run currently being executed, if any.
    current_cancel: Option<CancelHandle>,
    /// Stops the background activities tied to the consumer's lifetime.
    consumer_stop: Option<CancelHandle>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    work_available: Condvar,
}

/// Durable FIFO of runs with a single dedicated consumer.
///
/// The consumer blocks for the next run and hands it to the orchestrator, one at a time. Run
/// errors are caught per run so the consumer never dies; [RunQueue::abort] cancels whichever
/// run is executing and stops the consumer, and [RunQueue::restart] brings up a fresh one so
/// the remaining queued runs are not blocked.
pub struct RunQueue {
    inner: Arc<QueueInner>,
    orchestrator: Arc<RunOrchestrator>,
    persistence: Arc<dyn Persistence>,
    observer: Arc<dyn RunObserver>,
}

impl RunQueue {
    pub fn new(
        orchestrator: Arc<RunOrchestrator>,
        persistence: Arc<dyn Persistence>,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                work_available: Condvar::new(),
            }),
            orchestrator,
            persistence,
            observer,
        }
    }

    /// Re-enqueue every persisted QUEUED run, ordered by the time it was queued, then start
    /// the consumer. Called once at process start.
    pub fn start(&self) -> HarnessResult<()> {
        if self.consumer_alive() {
            anyhow::bail!("Queue consumer is already running");
        }

        let queued = self.persistence.queued_runs()?;
        if !queued.is_empty() {
            log::info!("Re-enqueueing {} persisted runs", queued.len());
        }

        {
            let mut state = self.inner.state.lock();
            for run in queued {
                let definition = match self.persistence.definition(&run.definition_id)? {
                    Some(definition) => definition,
                    None => {
                        log::warn!(
                            "Dropping persisted run {}, its definition {} no longer exists",
                            run.id,
                            run.definition_id
                        );
                        continue;
                    }
                };
                state.queue.push_back(QueuedRun {
                    run,
                    definition,
                    schedule_id: None,
                });
            }
        }

        self.start_consumer()
    }

    /// Append a run to the queue. The run must already be persisted as QUEUED by the caller.
    pub fn enqueue(&self, run: Run, definition: SimulationDefinition, schedule_id: Option<String>) {
        log::info!("Queued run {} of definition {}", run.id, definition.id);
        self.observer.run_queued(&run);

        let mut state = self.inner.state.lock();
        state.queue.push_back(QueuedRun {
            run,
            definition,
            schedule_id,
        });
        self.inner.work_available.notify_one();
    }

    /// Cancel whichever run is currently executing and stop the consumer. The running run
    /// observes the cancellation at its next safe point and transitions to CANCELLED; call
    /// [RunQueue::restart] afterwards to resume processing the remaining queued runs.
    pub fn abort(&self) {
        let mut state = self.inner.state.lock();
        state.stop = true;
        if let Some(cancel) = &state.current_cancel {
            cancel.cancel();
        }
        if let Some(stop) = &state.consumer_stop {
            stop.cancel();
        }
        self.inner.work_available.notify_all();
    }

    /// Start a fresh consumer after an [RunQueue::abort]. Fails if one is still running.
    pub fn restart(&self) -> HarnessResult<()> {
        self.start_consumer()
    }

    /// Best-effort removal of a run that has not started yet. Returns false when the run is
    /// not waiting in the queue, typically because it already started.
    pub fn remove_if_queued(&self, run_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        let Some(position) = state.queue.iter().position(|item| item.run.id == run_id) else {
            log::info!("Run {run_id} is not waiting in the queue, leaving it alone");
            return false;
        };
        state.queue.remove(position);
        log::info!("Removed run {run_id} from the queue");
        true
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn consumer_alive(&self) -> bool {
        self.inner.state.lock().consumer_alive
    }

    fn start_consumer(&self) -> HarnessResult<()> {
        let consumer_stop = CancelHandle::new();
        {
            let mut state = self.inner.state.lock();
            if state.consumer_alive {
                anyhow::bail!("Queue consumer is already running");
            }
            state.consumer_alive = true;
            state.stop = false;
            state.consumer_stop = Some(consumer_stop.clone());
        }

        start_monitor(consumer_stop.new_listener());

        let inner = self.inner.clone();
        let orchestrator = self.orchestrator.clone();

        std::thread::Builder::new()
            .name("run-consumer".to_string())
            .spawn(move || {
                log::debug!("Run queue consumer started");

                while let Some((item, cancel)) = next_item(&inner) {
                    let listener = cancel.new_listener();
                    match orchestrator.execute(
                        item.run,
                        &item.definition,
                        item.schedule_id.as_deref(),
                        listener,
                    ) {
                        Ok(run) => {
                            log::info!("Run {} ended with status {:?}", run.id, run.status)
                        }
                        // Caught per run; the consumer itself never dies on a run failure.
                        Err(e) => log::error!("Run execution error: {e:?}"),
                    }
                    inner.state.lock().current_cancel = None;
                }

                let mut state = inner.state.lock();
                state.consumer_alive = false;
                state.current_cancel = None;
                log::debug!("Run queue consumer stopped");
            })
            .map_err(|e| anyhow::anyhow!("Failed to spawn run queue consumer: {e}"))?;

        Ok(())
    }
}

fn next_item(inner: &QueueInner) -> Option<(QueuedRun, CancelHandle)> {
    let mut state = inner.state.lock();
    loop {
        if state.stop {
            return None;
        }
        if let Some(item) = state.queue.pop_front() {
            let cancel = CancelHandle::new();
            state.current_cancel = Some(cancel.clone());
            return Some((item, cancel));
        }
        inner.work_available.wait(&mut state);
    }
}
