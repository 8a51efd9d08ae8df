//! Single-threaded cooperative host event loop.
//!
//! Stands in for the page environment the blocker lives in: it owns the
//! document, the settings store and the timer queue, and feeds the handler
//! one [`HostEvent`] at a time, the way `ApplicationHandler` callbacks are
//! driven by an event loop.
//!
//! ```text
//!  Dom::take_records ──► Mutations ─┐
//!  Store::take_changes ► StorageChanged ─┤
//!  settings read done ─► SettingsReady ──┼──► FIFO ──► handler.handle()
//!                                        │
//!  FIFO empty (idle) ──► idle callback (with Deadline)
//!  nothing idle ───────► advance clock to next timeout (no Deadline)
//! ```
//!
//! Time is virtual: it only moves when the loop waits for a timeout or when
//! [`Host::advance`] is called.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::dom::{Dom, MutationRecord};
use crate::scheduler::{Deadline, ExpiredDeadline, WallClockDeadline};
use crate::store::{ChangeSet, SettingsStore, StorageArea};

/// Default idle period granted to an idle callback.
const DEFAULT_IDLE_SLICE: Duration = Duration::from_millis(50);

/// Opaque handle to a pending callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token-{}", self.0)
    }
}

/// Primitives the host offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// `requestIdleCallback` is available.
    pub idle_callback: bool,
    /// Idle callbacks receive a deadline object. Without one a pass runs
    /// its whole snapshot.
    pub idle_deadline: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            idle_callback: true,
            idle_deadline: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Idle,
    Timeout,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    token: Token,
    kind: TimerKind,
    /// Timeout expiry for `Timeout`, forced-run time for `Idle`.
    due: Duration,
}

/// Timer queue with a virtual clock.
#[derive(Debug)]
pub struct Timers {
    capabilities: HostCapabilities,
    now: Duration,
    next_token: u64,
    timers: Vec<Timer>,
}

impl Timers {
    pub fn new(capabilities: HostCapabilities) -> Self {
        Self {
            capabilities,
            now: Duration::ZERO,
            next_token: 1,
            timers: Vec::new(),
        }
    }

    pub fn has_idle_callback(&self) -> bool {
        self.capabilities.idle_callback
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    /// Runs when the loop is idle, or after `timeout` at the latest.
    ///
    /// Hosts without the primitive degrade to a timeout of the same length.
    pub fn request_idle_callback(&mut self, timeout: Duration) -> Token {
        let kind = if self.capabilities.idle_callback {
            TimerKind::Idle
        } else {
            TimerKind::Timeout
        };
        self.insert(kind, timeout)
    }

    pub fn set_timeout(&mut self, delay: Duration) -> Token {
        self.insert(TimerKind::Timeout, delay)
    }

    /// Returns `false` if the token already fired or was cancelled.
    pub fn cancel(&mut self, token: Token) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.token != token);
        before != self.timers.len()
    }

    pub fn is_pending(&self, token: Token) -> bool {
        self.timers.iter().any(|t| t.token == token)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    fn insert(&mut self, kind: TimerKind, delay: Duration) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        self.timers.push(Timer {
            token,
            kind,
            due: self.now + delay,
        });
        token
    }

    /// Removes and returns the earliest timer that is already due.
    fn take_due(&mut self) -> Option<Timer> {
        let now = self.now;
        self.take_min_where(|t| t.due <= now)
    }

    fn take_first_idle(&mut self) -> Option<Timer> {
        self.take_min_where(|t| t.kind == TimerKind::Idle)
    }

    fn take_next_timeout(&mut self) -> Option<Timer> {
        let timer = self.take_min_where(|t| t.kind == TimerKind::Timeout)?;
        self.now = self.now.max(timer.due);
        Some(timer)
    }

    fn take_min_where(&mut self, mut pred: impl FnMut(&Timer) -> bool) -> Option<Timer> {
        let index = self
            .timers
            .iter()
            .enumerate()
            .filter(|(_, t)| pred(t))
            .min_by_key(|(_, t)| (t.due, t.token))
            .map(|(i, _)| i)?;
        Some(self.timers.remove(index))
    }
}

/// What the loop hands to its handler.
pub enum HostEvent {
    /// The asynchronous settings read requested by the handler completed.
    SettingsReady,
    /// Child-list changes observed since the last delivery.
    Mutations(Vec<MutationRecord>),
    /// A write to the settings store, per area.
    StorageChanged {
        area: StorageArea,
        changes: ChangeSet,
    },
    /// A scheduled callback fired. Idle callbacks carry a deadline.
    Callback {
        token: Token,
        deadline: Option<Box<dyn Deadline>>,
    },
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostEvent::SettingsReady => f.write_str("SettingsReady"),
            HostEvent::Mutations(records) => write!(f, "Mutations({} records)", records.len()),
            HostEvent::StorageChanged { area, changes } => {
                write!(f, "StorageChanged({area}, {} keys)", changes.len())
            }
            HostEvent::Callback { token, deadline } => {
                write!(f, "Callback({token}, deadline: {})", deadline.is_some())
            }
        }
    }
}

/// Receives host events.
pub trait HostHandler<D: Dom, S: SettingsStore> {
    fn handle(&mut self, host: &mut Host<D, S>, event: HostEvent);
}

type DeadlineFactory = Box<dyn FnMut() -> Box<dyn Deadline>>;

/// The page environment: document, store, timers and the event FIFO.
pub struct Host<D: Dom, S: SettingsStore> {
    pub dom: D,
    pub store: S,
    pub timers: Timers,
    events: VecDeque<HostEvent>,
    deadlines: DeadlineFactory,
    settings_gate_open: bool,
    settings_read_pending: bool,
}

impl<D: Dom, S: SettingsStore> Host<D, S> {
    pub fn new(dom: D, store: S, capabilities: HostCapabilities) -> Self {
        Self {
            dom,
            store,
            timers: Timers::new(capabilities),
            events: VecDeque::new(),
            deadlines: Box::new(|| Box::new(WallClockDeadline::starting_now(DEFAULT_IDLE_SLICE))),
            settings_gate_open: true,
            settings_read_pending: false,
        }
    }

    /// Replaces the deadline handed to idle callbacks.
    pub fn with_deadlines(mut self, factory: impl FnMut() -> Box<dyn Deadline> + 'static) -> Self {
        self.deadlines = Box::new(factory);
        self
    }

    pub fn post(&mut self, event: HostEvent) {
        self.events.push_back(event);
    }

    /// Starts the asynchronous settings read; completion arrives as
    /// [`HostEvent::SettingsReady`].
    pub fn request_settings_read(&mut self) {
        if self.settings_gate_open {
            self.post(HostEvent::SettingsReady);
        } else {
            self.settings_read_pending = true;
        }
    }

    /// Holds settings reads back until [`Host::release_settings_reads`].
    pub fn hold_settings_reads(&mut self) {
        self.settings_gate_open = false;
    }

    pub fn release_settings_reads(&mut self) {
        self.settings_gate_open = true;
        if std::mem::take(&mut self.settings_read_pending) {
            self.post(HostEvent::SettingsReady);
        }
    }

    /// Moves the virtual clock forward.
    pub fn advance(&mut self, by: Duration) {
        self.timers.now += by;
    }

    /// Next event in delivery order, or `None` when nothing is left to do.
    pub fn next_event(&mut self) -> Option<HostEvent> {
        self.collect();

        if let Some(timer) = self.timers.take_due() {
            return Some(self.fire(timer, true));
        }
        if let Some(event) = self.events.pop_front() {
            return Some(event);
        }
        if let Some(timer) = self.timers.take_first_idle() {
            return Some(self.fire(timer, false));
        }
        self.timers
            .take_next_timeout()
            .map(|timer| self.fire(timer, true))
    }

    /// Delivers one event. Returns `false` once the loop is quiescent.
    pub fn step<H: HostHandler<D, S>>(&mut self, handler: &mut H) -> bool {
        match self.next_event() {
            Some(event) => {
                trace!(?event, "dispatch");
                handler.handle(self, event);
                true
            }
            None => false,
        }
    }

    /// Runs until quiescent; returns the number of events delivered.
    pub fn run<H: HostHandler<D, S>>(&mut self, handler: &mut H) -> usize {
        let mut delivered = 0;
        while self.step(handler) {
            delivered += 1;
        }
        delivered
    }

    fn collect(&mut self) {
        let records = self.dom.take_records();
        if !records.is_empty() {
            self.events.push_back(HostEvent::Mutations(records));
        }
        for (area, changes) in self.store.take_changes() {
            self.events
                .push_back(HostEvent::StorageChanged { area, changes });
        }
    }

    fn fire(&mut self, timer: Timer, forced: bool) -> HostEvent {
        let with_deadline = self.timers.capabilities.idle_deadline;
        let deadline: Option<Box<dyn Deadline>> = match (timer.kind, forced) {
            (TimerKind::Timeout, _) => None,
            (TimerKind::Idle, _) if !with_deadline => None,
            (TimerKind::Idle, true) => Some(Box::new(ExpiredDeadline)),
            (TimerKind::Idle, false) => Some((self.deadlines)()),
        };
        HostEvent::Callback {
            token: timer.token,
            deadline,
        }
    }
}
