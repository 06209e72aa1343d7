use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::{AgentRuntime, AgentStep, StepMemory};
use crate::backend::truncate_text;
use crate::error::{AgentError, AgentResult};
use crate::tools::{ToolContext, ToolSet};

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

const OBSERVATION_PREVIEW_CHARS: usize = 80;

/// Runs agent turns on a background worker, one at a time.
#[derive(Clone)]
pub struct AgentRunner {
    runtime: Arc<dyn AgentRuntime>,
    tools: Arc<ToolSet>,
    poll_interval: Duration,
    busy: Arc<AtomicBool>,
}

/// Clears the runner's busy flag on drop. Owned by the run handle and
/// released only once the worker has been joined.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AgentRunner {
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        tools: Arc<ToolSet>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runtime,
            tools,
            poll_interval,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Starts a run on a fresh worker thread and returns the poll handle.
    /// Fails with [`AgentError::Busy`] until the previous run has been
    /// joined.
    pub fn run(&self, context: impl Into<String>, ctx: ToolContext) -> AgentResult<AgentRun> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AgentError::Busy);
        }
        let guard = BusyGuard(self.busy.clone());

        let context = context.into();
        let memory = StepMemory::new();
        let worker_memory = memory.clone();
        let runtime = self.runtime.clone();
        let tools = self.tools.clone();
        let started = Instant::now();

        info!(runtime = runtime.name(), mode = %ctx.mode, "agent run started");
        let handle = thread::Builder::new()
            .name("genchat-agent".to_string())
            .spawn(move || runtime.run(&context, &tools, &ctx, &worker_memory))?;

        Ok(AgentRun {
            handle: Some(handle),
            guard: Some(guard),
            memory,
            started,
            poll_interval: self.poll_interval,
            ticks: 0,
        })
    }
}

/// Read-only view of a run in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub elapsed: Duration,
    pub step_count: usize,
    pub latest_tool: Option<String>,
    pub latest_observation: Option<String>,
    pub tick: usize,
}

impl ProgressSnapshot {
    pub fn spinner(&self) -> &'static str {
        SPINNER_FRAMES[self.tick % SPINNER_FRAMES.len()]
    }

    pub fn render(&self) -> String {
        let mut line = format!(
            "{} Working... {:.1}s | step {}",
            self.spinner(),
            self.elapsed.as_secs_f64(),
            self.step_count
        );
        if let Some(tool) = self.latest_tool.as_deref() {
            line.push_str(&format!(" | {tool}"));
        }
        if let Some(observation) = self.latest_observation.as_deref() {
            line.push_str(&format!(": {observation}"));
        }
        line
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub result: AgentResult<String>,
    pub steps: Vec<AgentStep>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum RunEvent {
    Progress(ProgressSnapshot),
    Finished(RunOutcome),
}

/// Poll handle for one run. Iterating yields progress snapshots, one per
/// poll interval, then exactly one `Finished` after the worker has joined.
///
/// Dropping the handle early does not stop the worker; the runner stays
/// busy until the abandoned worker has been joined.
pub struct AgentRun {
    handle: Option<JoinHandle<AgentResult<String>>>,
    guard: Option<BusyGuard>,
    memory: StepMemory,
    started: Instant,
    poll_interval: Duration,
    ticks: usize,
}

impl AgentRun {
    pub fn snapshot(&self) -> ProgressSnapshot {
        let latest = self.memory.latest();
        ProgressSnapshot {
            elapsed: self.started.elapsed(),
            step_count: latest.as_ref().map(|step| step.index).unwrap_or(0),
            latest_tool: latest.as_ref().and_then(|step| step.tool.clone()),
            latest_observation: latest
                .and_then(|step| step.observation)
                .map(|text| truncate_text(text.trim(), OBSERVATION_PREVIEW_CHARS)),
            tick: self.ticks,
        }
    }

    /// Blocks until the worker joins, skipping progress.
    pub fn wait(self) -> RunOutcome {
        let mut last = None;
        for event in self {
            if let RunEvent::Finished(outcome) = event {
                last = Some(outcome);
            }
        }
        last.unwrap_or_else(|| RunOutcome {
            result: Err(AgentError::Runtime("agent run already consumed".to_string())),
            steps: Vec::new(),
            elapsed: Duration::ZERO,
        })
    }

    fn finish(&mut self, handle: JoinHandle<AgentResult<String>>) -> RunOutcome {
        let result = match handle.join() {
            Ok(result) => result,
            Err(payload) => Err(AgentError::Panicked(panic_message(payload.as_ref()))),
        };
        drop(self.guard.take());
        let elapsed = self.started.elapsed();
        let steps = self.memory.snapshot();
        match &result {
            Ok(_) => info!(
                steps = steps.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "agent run finished"
            ),
            Err(err) => error!(
                steps = steps.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %err,
                "agent run failed"
            ),
        }
        RunOutcome {
            result,
            steps,
            elapsed,
        }
    }
}

impl Iterator for AgentRun {
    type Item = RunEvent;

    fn next(&mut self) -> Option<RunEvent> {
        let handle = self.handle.take()?;

        if self.ticks > 0 {
            if !handle.is_finished() {
                thread::sleep(self.poll_interval);
            }
            if handle.is_finished() {
                return Some(RunEvent::Finished(self.finish(handle)));
            }
        }

        let snapshot = self.snapshot();
        debug!(step = snapshot.step_count, tick = snapshot.tick, "agent progress");
        self.ticks += 1;
        self.handle = Some(handle);
        Some(RunEvent::Progress(snapshot))
    }
}

impl Drop for AgentRun {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let guard = self.guard.take();
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        let reaper = thread::Builder::new()
            .name("genchat-agent-reaper".to_string())
            .spawn(move || {
                let _guard = guard;
                if handle.join().is_err() {
                    warn!("abandoned agent run panicked");
                }
            });
        if let Err(err) = reaper {
            warn!(error = %err, "failed to join abandoned agent run");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic payload".to_string()
}
