#![forbid(unsafe_code)]

//! Command executor: owns the authoritative forest and the undo/redo history.
//!
//! In-memory application is synchronous and one command at a time (`&mut
//! self`). Persistence runs on a single worker thread that executes jobs in
//! the order they were issued, so the writes for any node reach the store in
//! edit order.

use crate::command::{Command, CommandKind};
use crate::config::{ApplyMode, EngineConfig};
use crate::forest::{Forest, ForestError};
use crate::persist::{NodeStore, PersistError};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("persistence worker failed to start: {0}")]
    Spawn(String),
    #[error("persistence worker stopped")]
    WorkerGone,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistPhase {
    Post,
    Undo,
    Redo,
}

impl PersistPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Undo => "undo",
            Self::Redo => "redo",
        }
    }
}

/// Result of one background persistence job.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistOutcome {
    pub seq: u64,
    pub kind: CommandKind,
    pub phase: PersistPhase,
    pub result: Result<i64, PersistError>,
}

impl PersistOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

enum Job {
    Run {
        seq: u64,
        command: Arc<Command>,
        phase: PersistPhase,
        reply: Option<Sender<Result<i64, PersistError>>>,
    },
    Flush(Sender<()>),
}

struct Worker {
    jobs: Sender<Job>,
    outcomes: Receiver<PersistOutcome>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn spawn(store: Box<dyn NodeStore>) -> Result<Self, ExecError> {
        let (jobs_tx, jobs_rx) = unbounded();
        let (outcomes_tx, outcomes_rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("cf-persist".to_string())
            .spawn(move || run_worker(store, jobs_rx, outcomes_tx))
            .map_err(|err| ExecError::Spawn(err.to_string()))?;
        Ok(Self {
            jobs: jobs_tx,
            outcomes: outcomes_rx,
            handle,
        })
    }
}

fn run_worker(mut store: Box<dyn NodeStore>, jobs: Receiver<Job>, outcomes: Sender<PersistOutcome>) {
    for job in jobs.iter() {
        match job {
            Job::Run {
                seq,
                command,
                phase,
                reply,
            } => {
                let result = match phase {
                    PersistPhase::Post => command.post(store.as_mut(), None),
                    PersistPhase::Undo => command.undo(store.as_mut(), None),
                    PersistPhase::Redo => command.redo(store.as_mut(), None),
                };
                match &result {
                    Ok(timestamp) => tracing::debug!(
                        seq,
                        kind = command.kind().as_str(),
                        phase = phase.as_str(),
                        timestamp,
                        "persisted"
                    ),
                    Err(err) => tracing::warn!(
                        seq,
                        kind = command.kind().as_str(),
                        phase = phase.as_str(),
                        error = %err,
                        "persistence failed; in-memory state kept"
                    ),
                }
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        let _ = outcomes.send(PersistOutcome {
                            seq,
                            kind: command.kind(),
                            phase,
                            result,
                        });
                    }
                }
            }
            Job::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

pub struct Executor {
    forest: Arc<Forest>,
    undo_stack: VecDeque<Arc<Command>>,
    redo_stack: Vec<Arc<Command>>,
    config: EngineConfig,
    next_seq: u64,
    worker: Option<Worker>,
    local_outcomes: Vec<PersistOutcome>,
}

impl Executor {
    /// Moves `store` onto a dedicated persistence thread.
    pub fn new(
        forest: Forest,
        store: Box<dyn NodeStore>,
        config: EngineConfig,
    ) -> Result<Self, ExecError> {
        let worker = Worker::spawn(store)?;
        let mut executor = Self::detached(forest, config);
        executor.worker = Some(worker);
        Ok(executor)
    }

    /// In-memory only; persistence phases are skipped.
    pub fn detached(forest: Forest, config: EngineConfig) -> Self {
        Self {
            forest: Arc::new(forest),
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            config,
            next_seq: 0,
            worker: None,
            local_outcomes: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the current forest. Later commands never change it.
    pub fn forest(&self) -> Arc<Forest> {
        Arc::clone(&self.forest)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn execute_command(&mut self, command: Command) -> Result<u64, ExecError> {
        self.execute_command_with(command, self.config.apply_mode)
    }

    /// Applies `command`, records it for undo and drops the redo history.
    /// Returns the sequence number of its persistence job.
    pub fn execute_command_with(
        &mut self,
        command: Command,
        mode: ApplyMode,
    ) -> Result<u64, ExecError> {
        let command = Arc::new(command);
        let seq = self.transition(&command, PersistPhase::Post, mode)?;
        self.push_undo(command);
        self.redo_stack.clear();
        Ok(seq)
    }

    /// `Ok(false)` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool, ExecError> {
        let Some(command) = self.undo_stack.pop_back() else {
            return Ok(false);
        };
        if let Err(err) = self.transition(&command, PersistPhase::Undo, self.config.apply_mode) {
            self.undo_stack.push_back(command);
            return Err(err);
        }
        self.redo_stack.push(command);
        Ok(true)
    }

    /// `Ok(false)` when there is nothing to redo.
    pub fn redo(&mut self) -> Result<bool, ExecError> {
        let Some(command) = self.redo_stack.pop() else {
            return Ok(false);
        };
        if let Err(err) = self.transition(&command, PersistPhase::Redo, self.config.apply_mode) {
            self.redo_stack.push(command);
            return Err(err);
        }
        self.push_undo(command);
        Ok(true)
    }

    /// Replaces the forest with a freshly loaded one and forgets the history,
    /// whose images no longer describe the current records.
    pub fn reload(&mut self, forest: Forest) {
        tracing::info!(
            tree = %forest.tree_id(),
            dropped_undo = self.undo_stack.len(),
            dropped_redo = self.redo_stack.len(),
            "forest reloaded"
        );
        self.forest = Arc::new(forest);
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Outcomes of background persistence jobs finished so far.
    pub fn drain_outcomes(&mut self) -> Vec<PersistOutcome> {
        let mut out = std::mem::take(&mut self.local_outcomes);
        if let Some(worker) = &self.worker {
            out.extend(worker.outcomes.try_iter());
        }
        out
    }

    /// Waits for every queued job, then drains the outcomes.
    pub fn flush(&mut self) -> Vec<PersistOutcome> {
        if let Some(worker) = &self.worker {
            let (done_tx, done_rx) = bounded(1);
            if worker.jobs.send(Job::Flush(done_tx)).is_ok() {
                let _ = done_rx.recv();
            }
        }
        self.drain_outcomes()
    }

    fn transition(
        &mut self,
        command: &Arc<Command>,
        phase: PersistPhase,
        mode: ApplyMode,
    ) -> Result<u64, ExecError> {
        let reverse = phase == PersistPhase::Undo;
        if reverse {
            command.validate_undo(&self.forest)?;
        } else {
            command.validate(&self.forest)?;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        if mode == ApplyMode::WriteThrough {
            self.persist_now(seq, command, phase)?;
        }

        let forest = Arc::make_mut(&mut self.forest);
        if reverse {
            command.undo_state(forest)?;
        } else {
            command.execute(forest)?;
        }
        tracing::debug!(
            seq,
            kind = command.kind().as_str(),
            phase = phase.as_str(),
            mode = mode.as_str(),
            "applied"
        );

        if mode == ApplyMode::Optimistic {
            self.enqueue(seq, command, phase);
        }
        Ok(seq)
    }

    /// Runs the persistence job and waits for it. Only a successful write is
    /// recorded as an outcome; a failure aborts the transition instead.
    fn persist_now(
        &mut self,
        seq: u64,
        command: &Arc<Command>,
        phase: PersistPhase,
    ) -> Result<(), ExecError> {
        let Some(worker) = &self.worker else {
            return Ok(());
        };
        let (reply_tx, reply_rx) = bounded(1);
        worker
            .jobs
            .send(Job::Run {
                seq,
                command: Arc::clone(command),
                phase,
                reply: Some(reply_tx),
            })
            .map_err(|_| ExecError::WorkerGone)?;
        let timestamp = reply_rx.recv().map_err(|_| ExecError::WorkerGone)??;
        self.local_outcomes.push(PersistOutcome {
            seq,
            kind: command.kind(),
            phase,
            result: Ok(timestamp),
        });
        Ok(())
    }

    fn enqueue(&mut self, seq: u64, command: &Arc<Command>, phase: PersistPhase) {
        let Some(worker) = &self.worker else {
            return;
        };
        let job = Job::Run {
            seq,
            command: Arc::clone(command),
            phase,
            reply: None,
        };
        if worker.jobs.send(job).is_err() {
            tracing::warn!(seq, phase = phase.as_str(), "persistence worker stopped");
            self.local_outcomes.push(PersistOutcome {
                seq,
                kind: command.kind(),
                phase,
                result: Err(PersistError::Unavailable("persistence worker stopped".to_string())),
            });
        }
    }

    fn push_undo(&mut self, command: Arc<Command>) {
        self.undo_stack.push_back(command);
        while self.undo_stack.len() > self.config.history_limit {
            self.undo_stack.pop_front();
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let Worker { jobs, handle, .. } = worker;
            drop(jobs);
            if handle.join().is_err() {
                tracing::warn!("persistence worker panicked");
            }
        }
    }
}
