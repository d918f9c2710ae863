//! Periodic read-out of the stove into a [`RegisterStore`].
//!
//! A poll cycle sends the normal data query through the [`RetryPolicy`]. Should the stove answer
//! with the `ERR` sentinel, the cycle follows up with the error query and merges only its
//! results. The whole query sequence is itself attempted a few times, with pauses in between,
//! before the cycle is declared failed. A failed cycle still serves the last known readings; only
//! a stove that has never answered surfaces as [`Error::Unavailable`].
use crate::connection::Transport;
use crate::protocol::{Frame, Request};
use crate::registers::RegisterId;
use crate::retry::{self, RetryPolicy};
use crate::store::{Entry, RegisterStore, Snapshot};
use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CYCLE_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_CYCLE_ATTEMPTS: u32 = 3;
pub const DEFAULT_CYCLE_PAUSE: Duration = Duration::from_secs(5);

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "engine::Args")]
pub struct Args {
    #[clap(flatten)]
    pub retry: retry::Args,

    /// Give up on one pass over the queries, retries included, after this long.
    #[arg(long, default_value = "20s")]
    pub cycle_timeout: humantime::Duration,

    /// How many passes over the queries a poll makes before it is considered failed.
    #[arg(long, default_value_t = DEFAULT_CYCLE_ATTEMPTS)]
    pub cycle_attempts: u32,

    /// Pause between two passes of the same poll.
    #[arg(long, default_value = "5s")]
    pub cycle_pause: humantime::Duration,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            retry: retry::Args::default(),
            cycle_timeout: DEFAULT_CYCLE_TIMEOUT.into(),
            cycle_attempts: DEFAULT_CYCLE_ATTEMPTS,
            cycle_pause: DEFAULT_CYCLE_PAUSE.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PollState {
    Idle,
    Querying,
    ErrorQuerying,
    Merged,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FailureReason {
    #[strum(to_string = "the stove did not answer the data query")]
    NoResponse,
    #[strum(to_string = "the stove reported an error but did not answer the error query")]
    NoErrorResponse,
    #[strum(to_string = "the queries did not complete in time")]
    Timeout,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no readings received from the stove after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: FailureReason },
}

/// The result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Fresh readings were merged, the snapshot includes them.
    Success(Snapshot),
    /// Nothing new arrived, the snapshot holds the last known readings.
    Failure { reason: FailureReason, last_known: Snapshot },
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success(_))
    }

    pub fn snapshot(&self) -> &Snapshot {
        match self {
            PollOutcome::Success(snapshot) => snapshot,
            PollOutcome::Failure { last_known, .. } => last_known,
        }
    }

    pub fn into_parts(self) -> (bool, Snapshot) {
        match self {
            PollOutcome::Success(snapshot) => (true, snapshot),
            PollOutcome::Failure { last_known, .. } => (false, last_known),
        }
    }
}

pub struct PollingEngine<T> {
    transport: Arc<T>,
    retry: RetryPolicy,
    cycle_timeout: Duration,
    cycle_attempts: u32,
    cycle_pause: Duration,
    store: Mutex<RegisterStore>,
    state: Mutex<PollState>,
    /// Held for the duration of a poll cycle so that cycles never overlap.
    cycle: tokio::sync::Mutex<()>,
}

impl<T: Transport> PollingEngine<T> {
    pub fn new(transport: Arc<T>, args: &Args) -> Self {
        Self {
            transport,
            retry: RetryPolicy::new(&args.retry),
            cycle_timeout: *args.cycle_timeout,
            cycle_attempts: args.cycle_attempts.max(1),
            cycle_pause: *args.cycle_pause,
            store: Mutex::new(RegisterStore::new()),
            state: Mutex::new(PollState::Idle),
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn store(&self) -> MutexGuard<'_, RegisterStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, to: PollState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug!(from = %*state, %to, "poll state transition");
        *state = to;
    }

    pub fn state(&self) -> PollState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store().snapshot()
    }

    pub fn entry(&self, register: RegisterId) -> Option<Entry> {
        self.store().get(register)
    }

    fn merge(&self, frame: &Frame) -> Snapshot {
        let mut store = self.store();
        let summary = store.merge(frame);
        info!(
            message = "merged a poll",
            merged = summary.merged,
            changed = summary.changed,
            skipped = summary.skipped
        );
        store.snapshot()
    }

    /// One pass over the data query and, if the stove asks for it, the error query.
    async fn query_pass(&self) -> Result<Frame, FailureReason> {
        self.transition(PollState::Querying);
        let frame = self.retry.query(&*self.transport, &Request::Data).await;
        if frame.is_blank() {
            return Err(FailureReason::NoResponse);
        }
        if !frame.is_error_redirect() {
            return Ok(frame);
        }
        self.transition(PollState::ErrorQuerying);
        let frame = self.retry.query(&*self.transport, &Request::Errors).await;
        if frame.is_blank() || frame.is_error_redirect() {
            return Err(FailureReason::NoErrorResponse);
        }
        Ok(frame)
    }

    /// Run one poll cycle.
    pub async fn poll(&self) -> Result<PollOutcome, Error> {
        let _cycle = self.cycle.lock().await;
        let mut reason = FailureReason::NoResponse;
        for attempt in 1..=self.cycle_attempts {
            match tokio::time::timeout(self.cycle_timeout, self.query_pass()).await {
                Ok(Ok(frame)) => {
                    let snapshot = self.merge(&frame);
                    self.transition(PollState::Merged);
                    return Ok(PollOutcome::Success(snapshot));
                }
                Ok(Err(why)) => reason = why,
                Err(_) => reason = FailureReason::Timeout,
            }
            warn!(attempt, %reason, "poll pass failed");
            if attempt < self.cycle_attempts {
                tokio::time::sleep(self.cycle_pause).await;
            }
        }
        self.transition(PollState::Failed);
        let last_known = self.snapshot();
        if last_known.is_empty() {
            error!(%reason, "stove is unavailable and nothing is known about it");
            return Err(Error::Unavailable { attempts: self.cycle_attempts, reason });
        }
        warn!(%reason, "poll failed, serving the last known readings");
        Ok(PollOutcome::Failure { reason, last_known })
    }

    /// List every register the stove reports in response to a data query.
    pub async fn discover(&self) -> Vec<RegisterId> {
        let frame = self.retry.query(&*self.transport, &Request::Data).await;
        let registers = frame.registers();
        info!(count = registers.len(), "discovered registers");
        registers
    }

    /// Poll immediately and then once every `period`.
    ///
    /// A cycle that overruns the period delays the next one rather than overlapping it.
    pub fn watch(&self, period: Duration) -> impl Stream<Item = Result<PollOutcome, Error>> + '_ {
        async_stream::stream! {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                yield self.poll().await;
            }
        }
    }
}
