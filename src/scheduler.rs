//! Idle-time batch scheduler.
//!
//! ## Seam
//!
//! [`IdleScheduler`] hides which host primitive delivers the callback:
//!
//! - [`IdleCallbackScheduler`]: idle callback with a timeout; the callback
//!   receives a [`Deadline`]
//! - [`TimeoutScheduler`]: fixed short delay; no deadline, so the pass runs
//!   its whole snapshot
//!
//! The choice is made once by [`select_idle_scheduler`]; [`Scheduler`] never
//! branches on host capability.
//!
//! ## Passes
//!
//! ```text
//! enqueue ─► WorkQueue ──arm──► token ──fires──► run_pass
//!                ▲                                 │ snapshot + clear
//!                └──── remainder (budget spent) ◄──┘ process one by one
//! ```
//!
//! At most one token is outstanding: arming always cancels the previous one.

use std::cell::Cell;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::SchedulerConfig;
use crate::dom::NodeId;
use crate::host::{Timers, Token};
use crate::queue::WorkQueue;

// ─────────────────────────────────────────────────────────────────────────────
// Deadlines
// ─────────────────────────────────────────────────────────────────────────────

/// Remaining idle budget handed to an idle callback.
pub trait Deadline {
    fn time_remaining(&self) -> Duration;

    /// `true` when the callback ran because its timeout elapsed.
    fn did_timeout(&self) -> bool {
        false
    }
}

/// Budget measured against the wall clock.
#[derive(Debug, Clone, Copy)]
pub struct WallClockDeadline {
    end: Instant,
}

impl WallClockDeadline {
    pub fn starting_now(slice: Duration) -> Self {
        Self {
            end: Instant::now() + slice,
        }
    }
}

impl Deadline for WallClockDeadline {
    fn time_remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }
}

/// Handed to idle callbacks forced by their timeout: nothing left.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiredDeadline;

impl Deadline for ExpiredDeadline {
    fn time_remaining(&self) -> Duration {
        Duration::ZERO
    }

    fn did_timeout(&self) -> bool {
        true
    }
}

/// Deterministic budget: reports `slice` for the first `checks` queries and
/// zero afterwards.
#[derive(Debug)]
pub struct CountdownDeadline {
    remaining_checks: Cell<u32>,
    slice: Duration,
}

impl CountdownDeadline {
    pub fn new(checks: u32, slice: Duration) -> Self {
        Self {
            remaining_checks: Cell::new(checks),
            slice,
        }
    }
}

impl Deadline for CountdownDeadline {
    fn time_remaining(&self) -> Duration {
        match self.remaining_checks.get() {
            0 => Duration::ZERO,
            n => {
                self.remaining_checks.set(n - 1);
                self.slice
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host primitive seam
// ─────────────────────────────────────────────────────────────────────────────

/// `scheduleIdleWork(callback, budgetHint)` over one host primitive.
pub trait IdleScheduler {
    fn schedule(&self, timers: &mut Timers) -> Token;

    fn cancel(&self, timers: &mut Timers, token: Token);

    fn name(&self) -> &'static str;
}

/// Idle callback, forced after `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct IdleCallbackScheduler {
    pub timeout: Duration,
}

impl IdleScheduler for IdleCallbackScheduler {
    fn schedule(&self, timers: &mut Timers) -> Token {
        timers.request_idle_callback(self.timeout)
    }

    fn cancel(&self, timers: &mut Timers, token: Token) {
        timers.cancel(token);
    }

    fn name(&self) -> &'static str {
        "idle-callback"
    }
}

/// Plain timeout after a fixed `delay`.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutScheduler {
    pub delay: Duration,
}

impl IdleScheduler for TimeoutScheduler {
    fn schedule(&self, timers: &mut Timers) -> Token {
        timers.set_timeout(self.delay)
    }

    fn cancel(&self, timers: &mut Timers, token: Token) {
        timers.cancel(token);
    }

    fn name(&self) -> &'static str {
        "timeout"
    }
}

/// Picks the idle primitive when the host has one (and config allows it),
/// the fixed-delay fallback otherwise.
pub fn select_idle_scheduler(config: &SchedulerConfig, timers: &Timers) -> Box<dyn IdleScheduler> {
    if config.prefer_idle_callback && timers.has_idle_callback() {
        Box::new(IdleCallbackScheduler {
            timeout: config.idle_timeout(),
        })
    } else {
        Box::new(TimeoutScheduler {
            delay: config.fallback_delay(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Result of one fired token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// The token was not ours (cancelled or superseded); nothing ran.
    Stale,
    /// The whole snapshot was processed.
    Completed { processed: usize },
    /// The budget ran out; `requeued` elements went back to the queue.
    Yielded { processed: usize, requeued: usize },
}

pub struct Scheduler {
    idle: Box<dyn IdleScheduler>,
    token: Option<Token>,
    min_time_remaining: Duration,
}

impl Scheduler {
    pub fn new(idle: Box<dyn IdleScheduler>, min_time_remaining: Duration) -> Self {
        Self {
            idle,
            token: None,
            min_time_remaining,
        }
    }

    pub fn from_config(config: &SchedulerConfig, timers: &Timers) -> Self {
        Self::new(
            select_idle_scheduler(config, timers),
            config.min_time_remaining(),
        )
    }

    pub fn primitive(&self) -> &'static str {
        self.idle.name()
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }

    /// Arms unless a token is already outstanding.
    pub fn ensure_armed(&mut self, timers: &mut Timers) -> Token {
        match self.token {
            Some(token) => token,
            None => self.rearm(timers),
        }
    }

    /// Cancels any outstanding token, then schedules a fresh one.
    pub fn rearm(&mut self, timers: &mut Timers) -> Token {
        if let Some(previous) = self.token.take() {
            self.idle.cancel(timers, previous);
        }
        let token = self.idle.schedule(timers);
        trace!(%token, primitive = self.idle.name(), "Scheduler armed");
        self.token = Some(token);
        token
    }

    /// Runs one pass for a fired `token`.
    ///
    /// The pending set is snapshotted and cleared first. After each element
    /// the deadline (if any) is checked; once it drops below the configured
    /// minimum the unprocessed remainder is put back and another pass is
    /// armed. Without a deadline the snapshot runs to completion.
    pub fn run_pass(
        &mut self,
        token: Token,
        timers: &mut Timers,
        queue: &mut WorkQueue,
        deadline: Option<&dyn Deadline>,
        mut process: impl FnMut(NodeId),
    ) -> PassOutcome {
        if self.token != Some(token) {
            return PassOutcome::Stale;
        }
        self.token = None;

        let snapshot = queue.take_snapshot();
        let total = snapshot.len();
        for (i, element) in snapshot.iter().enumerate() {
            process(*element);

            let rest = &snapshot[i + 1..];
            if !rest.is_empty()
                && let Some(deadline) = deadline
                && deadline.time_remaining() < self.min_time_remaining
            {
                let requeued = queue.extend(rest.iter().copied());
                self.rearm(timers);
                debug!(
                    processed = i + 1,
                    requeued,
                    timed_out = deadline.did_timeout(),
                    "Pass yielded"
                );
                return PassOutcome::Yielded {
                    processed: i + 1,
                    requeued,
                };
            }
        }

        if !queue.is_empty() {
            self.ensure_armed(timers);
        }
        debug!(processed = total, "Pass completed");
        PassOutcome::Completed { processed: total }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("primitive", &self.idle.name())
            .field("token", &self.token)
            .field("min_time_remaining", &self.min_time_remaining)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostCapabilities;

    fn ids(n: u32) -> Vec<NodeId> {
        (0..n).map(|i| NodeId::new(i, 0)).collect()
    }

    fn idle_scheduler(timers: &Timers) -> Scheduler {
        Scheduler::from_config(&SchedulerConfig::default(), timers)
    }

    #[test]
    fn test_select_prefers_idle_callback() {
        let timers = Timers::new(HostCapabilities::default());
        let s = idle_scheduler(&timers);
        assert_eq!(s.primitive(), "idle-callback");
    }

    #[test]
    fn test_select_falls_back_to_timeout() {
        let timers = Timers::new(HostCapabilities {
            idle_callback: false,
            ..HostCapabilities::default()
        });
        assert_eq!(idle_scheduler(&timers).primitive(), "timeout");

        let timers = Timers::new(HostCapabilities::default());
        let config = SchedulerConfig {
            prefer_idle_callback: false,
            ..SchedulerConfig::default()
        };
        assert_eq!(Scheduler::from_config(&config, &timers).primitive(), "timeout");
    }

    #[test]
    fn test_rearm_cancels_previous_token() {
        let mut timers = Timers::new(HostCapabilities::default());
        let mut s = idle_scheduler(&timers);
        let first = s.rearm(&mut timers);
        let second = s.rearm(&mut timers);
        assert_ne!(first, second);
        assert!(!timers.is_pending(first));
        assert!(timers.is_pending(second));
        assert_eq!(timers.pending_count(), 1);
    }

    #[test]
    fn test_ensure_armed_keeps_outstanding_token() {
        let mut timers = Timers::new(HostCapabilities::default());
        let mut s = idle_scheduler(&timers);
        let first = s.ensure_armed(&mut timers);
        assert_eq!(s.ensure_armed(&mut timers), first);
        assert_eq!(timers.pending_count(), 1);
    }

    #[test]
    fn test_pass_without_deadline_runs_everything() {
        let mut timers = Timers::new(HostCapabilities::default());
        let mut s = idle_scheduler(&timers);
        let mut queue = WorkQueue::new();
        queue.extend(ids(50));
        let token = s.ensure_armed(&mut timers);

        let mut seen = Vec::new();
        let outcome = s.run_pass(token, &mut timers, &mut queue, None, |e| seen.push(e));
        assert_eq!(outcome, PassOutcome::Completed { processed: 50 });
        assert_eq!(seen.len(), 50);
        assert!(queue.is_empty());
        assert!(!s.is_armed());
    }

    #[test]
    fn test_pass_yields_exact_remainder() {
        let mut timers = Timers::new(HostCapabilities::default());
        let mut s = idle_scheduler(&timers);
        let mut queue = WorkQueue::new();
        queue.extend(ids(10));
        let token = s.ensure_armed(&mut timers);

        // budget allows 3 checks, the 4th reports exhaustion
        let deadline = CountdownDeadline::new(3, Duration::from_millis(20));
        let mut seen = Vec::new();
        let outcome = s.run_pass(token, &mut timers, &mut queue, Some(&deadline), |e| {
            seen.push(e)
        });
        assert_eq!(
            outcome,
            PassOutcome::Yielded {
                processed: 4,
                requeued: 6
            }
        );
        assert_eq!(queue.len(), 6);
        for done in &seen {
            assert!(!queue.contains(*done), "processed element was requeued");
        }
        assert!(s.is_armed(), "yield must schedule another pass");
    }

    #[test]
    fn test_exhausted_on_last_element_completes() {
        let mut timers = Timers::new(HostCapabilities::default());
        let mut s = idle_scheduler(&timers);
        let mut queue = WorkQueue::new();
        queue.extend(ids(1));
        let token = s.ensure_armed(&mut timers);
        let outcome = s.run_pass(
            token,
            &mut timers,
            &mut queue,
            Some(&ExpiredDeadline),
            |_| {},
        );
        assert_eq!(outcome, PassOutcome::Completed { processed: 1 });
        assert!(!s.is_armed());
    }

    #[test]
    fn test_stale_token_does_nothing() {
        let mut timers = Timers::new(HostCapabilities::default());
        let mut s = idle_scheduler(&timers);
        let mut queue = WorkQueue::new();
        queue.extend(ids(3));
        let old = s.rearm(&mut timers);
        s.rearm(&mut timers);
        let outcome = s.run_pass(old, &mut timers, &mut queue, None, |_| panic!("ran"));
        assert_eq!(outcome, PassOutcome::Stale);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_countdown_deadline() {
        let d = CountdownDeadline::new(2, Duration::from_millis(10));
        assert_eq!(d.time_remaining(), Duration::from_millis(10));
        assert_eq!(d.time_remaining(), Duration::from_millis(10));
        assert_eq!(d.time_remaining(), Duration::ZERO);
        assert!(!d.did_timeout());
        assert!(ExpiredDeadline.did_timeout());
    }

    #[test]
    fn test_wall_clock_deadline_counts_down() {
        let d = WallClockDeadline::starting_now(Duration::from_secs(60));
        assert!(d.time_remaining() > Duration::from_secs(50));
        let d = WallClockDeadline::starting_now(Duration::ZERO);
        assert_eq!(d.time_remaining(), Duration::ZERO);
    }
}
