//! A deterministic discrete-event scheduler.
//!
//! Events are callbacks bound to an absolute simulation time. The scheduler
//! repeatedly pops the earliest queued event, advances time to it and runs it.
//! Events scheduled for the same time run in insertion order. Nothing runs
//! concurrently: a callback (and everything it calls synchronously) completes
//! before the next event is considered.
//!
//! The scheduler is single-threaded. `Context` is a cheap handle (`Rc`) that
//! can be cloned into callbacks, but it is neither `Send` nor `Sync`.
//!
//! # Panics
//!
//! If any event panics, the runtime will panic. Scheduling an event in the
//! past, canceling an event that is no longer queued, or resetting the runtime
//! from inside an event are programming errors and panic as well.
//!
//! # Example
//!
//! ```rust
//! use strata_runtime::{deterministic::Executor, Clock, Runner, Scheduler};
//! use std::time::Duration;
//!
//! let (executor, _, auditor) = Executor::default();
//! executor.start(|context| {
//!     context.schedule_delay(Duration::from_millis(10), |context| {
//!         println!("Fired at {:?}", context.current());
//!     });
//! });
//! println!("Auditor state: {}", auditor.state());
//! ```

use crate::{Clock, Error, Monitor, METRICS_PREFIX};
use prometheus_client::{
    encoding::{text::encode, EncodeLabelSet},
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::{Metric, Registry},
};
use rand::{rngs::StdRng, CryptoRng, RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::{
    cell::{Cell, RefCell},
    collections::BinaryHeap,
    fmt,
    rc::Rc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use strata_utils::{hex, SystemTimeExt};
use tracing::{debug, trace};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Schedule {
    kind: String,
}

impl Schedule {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
        }
    }
}

#[derive(Debug)]
struct Metrics {
    events_scheduled: Family<Schedule, Counter>,
    events_processed: Counter,
    events_canceled: Counter,
    events_pending: Gauge,
}

impl Metrics {
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self {
            events_scheduled: Family::default(),
            events_processed: Counter::default(),
            events_canceled: Counter::default(),
            events_pending: Gauge::default(),
        };
        registry.register(
            "events_scheduled",
            "Total number of events scheduled",
            metrics.events_scheduled.clone(),
        );
        registry.register(
            "events_processed",
            "Total number of events processed",
            metrics.events_processed.clone(),
        );
        registry.register(
            "events_canceled",
            "Total number of events canceled before running",
            metrics.events_canceled.clone(),
        );
        registry.register(
            "events_pending",
            "Number of events currently queued",
            metrics.events_pending.clone(),
        );
        metrics
    }
}

/// Track the state of the runtime for determinism auditing.
#[derive(Default)]
pub struct Auditor {
    hash: RefCell<Vec<u8>>,
}

impl Auditor {
    fn update(&self, operation: &[u8], fields: &[&[u8]]) {
        let mut hash = self.hash.borrow_mut();
        let mut hasher = Sha256::new();
        hasher.update(&*hash);
        hasher.update(operation);
        for field in fields {
            hasher.update(field);
        }
        *hash = hasher.finalize().to_vec();
    }

    fn schedule(&self, id: u64, at: SystemTime) {
        self.update(
            b"schedule",
            &[&id.to_be_bytes()[..], &at.epoch().as_nanos().to_be_bytes()[..]],
        );
    }

    fn process(&self, id: u64, label: &str) {
        self.update(b"process", &[&id.to_be_bytes()[..], label.as_bytes()]);
    }

    fn cancel(&self, id: u64) {
        self.update(b"cancel", &[&id.to_be_bytes()[..]]);
    }

    fn start(&self) {
        self.update(b"start", &[]);
    }

    fn stop(&self) {
        self.update(b"stop", &[]);
    }

    fn reset(&self) {
        self.update(b"reset", &[]);
    }

    fn rand(&self, method: &str) {
        self.update(b"rand", &[method.as_bytes()]);
    }

    fn register(&self, name: &str, help: &str) {
        self.update(b"register", &[name.as_bytes(), help.as_bytes()]);
    }

    fn encode(&self) {
        self.update(b"encode", &[]);
    }

    /// Generate a representation of the current state of the runtime.
    ///
    /// This can be used to ensure that logic running on top
    /// of the runtime is interacting deterministically.
    pub fn state(&self) -> String {
        hex(&self.hash.borrow())
    }
}

/// Configuration for the `deterministic` runtime.
#[derive(Clone)]
pub struct Config {
    /// Seed for the random number generator.
    pub seed: u64,

    /// If the runtime is about to process an event at or beyond this point
    /// (measured from the epoch), panic.
    pub timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 42,
            timeout: None,
        }
    }
}

/// Lifecycle of the run loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Created or reset, `start` has not been called.
    Idle,
    /// Inside `start`.
    Running,
    /// `start` returned, either because the queue drained or because `stop`
    /// was requested.
    Stopped,
}

/// Lifecycle of a single event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Queued,
    Running,
    Finished,
    Canceled,
}

type Callable = Box<dyn FnOnce(Context)>;

struct Entry {
    id: u64,
    at: SystemTime,
    label: String,
    status: Cell<Status>,
    callable: RefCell<Option<Callable>>,
}

/// Handle to a scheduled event.
///
/// The handle stays valid after the event ran or was canceled and can be used
/// to observe its status.
#[derive(Clone)]
pub struct Event {
    entry: Rc<Entry>,
}

impl Event {
    /// Unique (per runtime) identifier, increasing in insertion order.
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Absolute time the event is (or was) due.
    pub fn at(&self) -> SystemTime {
        self.entry.at
    }

    /// Current status of the event.
    pub fn status(&self) -> Status {
        self.entry.status.get()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.entry.id)
            .field("at", &self.entry.at.epoch())
            .field("status", &self.entry.status.get())
            .finish()
    }
}

struct Alarm {
    time: SystemTime,
    id: u64,
    entry: Rc<Entry>,
}

impl PartialEq for Alarm {
    fn eq(&self, other: &Self) -> bool {
        self.time.eq(&other.time) && self.id.eq(&other.id)
    }
}

impl Eq for Alarm {}

impl PartialOrd for Alarm {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Alarm {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse the ordering for min-heap (ties resolved by insertion order)
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Deterministic runtime that processes events in time order.
pub struct Executor {
    registry: RefCell<Registry>,
    deadline: Option<SystemTime>,
    metrics: Metrics,
    auditor: Rc<Auditor>,
    rng: RefCell<StdRng>,
    time: Cell<SystemTime>,
    counter: Cell<u64>,
    queue: RefCell<BinaryHeap<Alarm>>,
    pending: Cell<usize>,
    state: Cell<State>,
    stopping: Cell<bool>,
    executing: Cell<bool>,
    monitors: RefCell<Vec<Rc<dyn Monitor>>>,
}

impl Executor {
    /// Initialize a new `deterministic` runtime with the given configuration.
    pub fn init(cfg: Config) -> (Runner, Context, Rc<Auditor>) {
        // Create a new registry
        let mut registry = Registry::default();
        let runtime_registry = registry.sub_registry_with_prefix(METRICS_PREFIX);

        // Initialize runtime
        let metrics = Metrics::init(runtime_registry);
        let auditor = Rc::new(Auditor::default());
        let start_time = UNIX_EPOCH;
        let deadline = cfg
            .timeout
            .map(|timeout| start_time.checked_add(timeout).expect("timeout overflowed"));
        let executor = Rc::new(Self {
            registry: RefCell::new(registry),
            deadline,
            metrics,
            auditor: auditor.clone(),
            rng: RefCell::new(StdRng::seed_from_u64(cfg.seed)),
            time: Cell::new(start_time),
            counter: Cell::new(0),
            queue: RefCell::new(BinaryHeap::new()),
            pending: Cell::new(0),
            state: Cell::new(State::Idle),
            stopping: Cell::new(false),
            executing: Cell::new(false),
            monitors: RefCell::new(Vec::new()),
        });
        let context = Context {
            label: String::new(),
            executor,
        };
        (
            Runner {
                context: context.clone(),
            },
            context,
            auditor,
        )
    }

    /// Initialize a new `deterministic` runtime with the default configuration
    /// and the provided seed.
    pub fn seeded(seed: u64) -> (Runner, Context, Rc<Auditor>) {
        let cfg = Config {
            seed,
            ..Config::default()
        };
        Self::init(cfg)
    }

    /// Initialize a new `deterministic` runtime with the default configuration
    /// but panic if an event is due after the given timeout.
    pub fn timed(timeout: Duration) -> (Runner, Context, Rc<Auditor>) {
        let cfg = Config {
            timeout: Some(timeout),
            ..Config::default()
        };
        Self::init(cfg)
    }

    /// Initialize a new `deterministic` runtime with the default configuration.
    // We'd love to implement the trait but we can't because of the return type.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> (Runner, Context, Rc<Auditor>) {
        Self::init(Config::default())
    }

    fn set_pending(&self, pending: usize) {
        self.pending.set(pending);
        self.metrics.events_pending.set(pending as i64);
    }

    /// Drop canceled events from the head of the queue and return the time of
    /// the earliest live event.
    fn next_time(&self) -> Option<SystemTime> {
        let mut queue = self.queue.borrow_mut();
        while let Some(next) = queue.peek() {
            if next.entry.status.get() != Status::Canceled {
                return Some(next.time);
            }
            queue.pop();
        }
        None
    }

    /// Pop the earliest live event, unless a stop was requested and the event
    /// lies in the future.
    fn pop(&self) -> Option<Rc<Entry>> {
        let next = self.next_time()?;
        if self.stopping.get() && next > self.time.get() {
            return None;
        }
        self.queue.borrow_mut().pop().map(|alarm| alarm.entry)
    }

    fn monitors(&self) -> Vec<Rc<dyn Monitor>> {
        self.monitors.borrow().clone()
    }
}

/// Implementation of [`crate::Runner`] for the `deterministic` runtime.
pub struct Runner {
    context: Context,
}

impl crate::Runner for Runner {
    type Context = Context;

    fn start<F, T>(self, f: F) -> T
    where
        F: FnOnce(Context) -> T,
    {
        let output = f(self.context.clone());
        self.context.start();
        output
    }
}

/// Implementation of [`crate::Clock`], [`crate::Scheduler`],
/// [`crate::Metrics`], and [`rand::RngCore`] for the `deterministic` runtime.
pub struct Context {
    label: String,
    executor: Rc<Executor>,
}

impl Clone for Context {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            executor: self.executor.clone(),
        }
    }
}

impl Context {
    fn schedule(&self, at: SystemTime, callable: Callable) -> Event {
        let now = self.executor.time.get();
        assert!(
            at >= now,
            "cannot schedule event in the past (now={:?}, at={:?})",
            now.epoch(),
            at.epoch()
        );

        // Assign the next identifier
        let id = self.executor.counter.get();
        self.executor
            .counter
            .set(id.checked_add(1).expect("event counter overflow"));

        // Queue the event
        let entry = Rc::new(Entry {
            id,
            at,
            label: self.label.clone(),
            status: Cell::new(Status::Queued),
            callable: RefCell::new(Some(callable)),
        });
        self.executor.queue.borrow_mut().push(Alarm {
            time: at,
            id,
            entry: entry.clone(),
        });
        self.executor.set_pending(self.executor.pending.get() + 1);
        self.executor.auditor.schedule(id, at);
        trace!(id, at = at.epoch_millis(), label = %self.label, "scheduled event");
        Event { entry }
    }

    /// Process the earliest queued event.
    ///
    /// Returns `false` (without advancing time) if no event is queued or if a
    /// stop was requested and the next event lies in the future.
    pub fn process_one_event(&self) -> bool {
        let Some(entry) = self.executor.pop() else {
            return false;
        };

        // Ensure we have not exceeded our deadline
        if let Some(deadline) = self.executor.deadline {
            if entry.at >= deadline {
                panic!("runtime timeout");
            }
        }

        // Advance time
        if entry.at > self.executor.time.get() {
            self.executor.time.set(entry.at);
            trace!(now = entry.at.epoch_millis(), "time advanced");
        }
        self.executor.set_pending(self.executor.pending.get() - 1);

        // Run the event
        self.executor.auditor.process(entry.id, &entry.label);
        trace!(id = entry.id, "processing event");
        entry.status.set(Status::Running);
        let callable = entry.callable.borrow_mut().take();
        if let Some(callable) = callable {
            let context = Context {
                label: entry.label.clone(),
                executor: self.executor.clone(),
            };
            let outer = self.executor.executing.replace(true);
            callable(context);
            self.executor.executing.set(outer);
        }
        entry.status.set(Status::Finished);
        self.executor.metrics.events_processed.inc();

        // Notify monitors
        let now = self.executor.time.get();
        for monitor in self.executor.monitors() {
            monitor.on_process_one_event(now);
        }
        true
    }

    /// Process events until the queue drains or [Context::stop] is called.
    ///
    /// A stop only takes effect once every event due at the current time has
    /// run.
    pub fn start(&self) {
        assert!(
            !self.executor.executing.get(),
            "cannot start the runtime from inside an event"
        );
        self.executor.auditor.start();
        self.executor.stopping.set(false);
        self.executor.state.set(State::Running);
        debug!(pending = self.executor.pending.get(), "runtime started");

        let mut processed: u64 = 0;
        while self.process_one_event() {
            processed += 1;
        }

        self.executor.stopping.set(false);
        self.executor.state.set(State::Stopped);
        debug!(
            processed,
            pending = self.executor.pending.get(),
            now = self.executor.time.get().epoch_millis(),
            "runtime stopped"
        );
    }

    /// Request the run loop to stop before time advances again.
    pub fn stop(&self) {
        self.executor.auditor.stop();
        self.executor.stopping.set(true);
        debug!(now = self.executor.time.get().epoch_millis(), "stop requested");
    }

    /// Discard all pending events and return time to the epoch.
    ///
    /// Handles of discarded events report [Status::Canceled].
    pub fn reset(&self) {
        assert!(
            !self.executor.executing.get(),
            "cannot reset the runtime from inside an event"
        );
        let discarded: Vec<Alarm> = self.executor.queue.borrow_mut().drain().collect();
        for alarm in discarded {
            if alarm.entry.status.get() == Status::Queued {
                alarm.entry.status.set(Status::Canceled);
                alarm.entry.callable.borrow_mut().take();
            }
        }
        self.executor.set_pending(0);
        self.executor.time.set(UNIX_EPOCH);
        self.executor.stopping.set(false);
        self.executor.state.set(State::Idle);
        self.executor.auditor.reset();
        debug!("runtime reset");
    }

    /// Process every event due at or before `until`, then advance time to
    /// `until` (if it lies in the future).
    pub fn run_until(&self, until: SystemTime) {
        while let Some(next) = self.executor.next_time() {
            if next > until || !self.process_one_event() {
                break;
            }
        }
        if until > self.executor.time.get() {
            self.executor.time.set(until);
        }
    }

    /// Current lifecycle state of the run loop.
    pub fn state(&self) -> State {
        self.executor.state.get()
    }

    /// Attach a monitor that is notified of scheduler activity.
    pub fn attach(&self, monitor: Rc<dyn Monitor>) {
        self.executor.monitors.borrow_mut().push(monitor);
    }
}

impl Clock for Context {
    fn current(&self) -> SystemTime {
        self.executor.time.get()
    }
}

impl crate::Scheduler for Context {
    type Event = Event;

    fn schedule_now<F>(&self, f: F) -> Event
    where
        F: FnOnce(Self) + 'static,
    {
        let now = self.executor.time.get();
        let event = self.schedule(now, Box::new(f));
        self.executor
            .metrics
            .events_scheduled
            .get_or_create(&Schedule::new("now"))
            .inc();
        for monitor in self.executor.monitors() {
            monitor.on_schedule_now(now);
        }
        event
    }

    fn schedule_delay<F>(&self, delay: Duration, f: F) -> Event
    where
        F: FnOnce(Self) + 'static,
    {
        let now = self.executor.time.get();
        let at = now.checked_add(delay).expect("executor time overflowed");
        let event = self.schedule(at, Box::new(f));
        self.executor
            .metrics
            .events_scheduled
            .get_or_create(&Schedule::new("delay"))
            .inc();
        for monitor in self.executor.monitors() {
            monitor.on_schedule_delay(now, delay);
        }
        event
    }

    fn schedule_at<F>(&self, at: SystemTime, f: F) -> Event
    where
        F: FnOnce(Self) + 'static,
    {
        let event = self.schedule(at, Box::new(f));
        self.executor
            .metrics
            .events_scheduled
            .get_or_create(&Schedule::new("at"))
            .inc();
        let now = self.executor.time.get();
        for monitor in self.executor.monitors() {
            monitor.on_schedule_at(now, at);
        }
        event
    }

    fn try_cancel(&self, event: &Event) -> Result<(), Error> {
        match event.entry.status.get() {
            Status::Queued => {}
            Status::Running => {
                return Err(Error::InvalidHandle("event is currently being executed"))
            }
            Status::Finished => return Err(Error::InvalidHandle("event has already been executed")),
            Status::Canceled => return Err(Error::InvalidHandle("event has already been canceled")),
        }

        // The alarm stays in the heap and is skipped once it reaches the head
        event.entry.status.set(Status::Canceled);
        let callable = event.entry.callable.borrow_mut().take();
        drop(callable);
        self.executor.set_pending(self.executor.pending.get() - 1);
        self.executor.metrics.events_canceled.inc();
        self.executor.auditor.cancel(event.entry.id);
        trace!(id = event.entry.id, "canceled event");

        let now = self.executor.time.get();
        for monitor in self.executor.monitors() {
            monitor.on_cancel(now);
        }
        Ok(())
    }

    fn pending(&self) -> usize {
        self.executor.pending.get()
    }
}

impl crate::Metrics for Context {
    fn with_label(&self, label: &str) -> Self {
        let label = {
            let prefix = self.label.clone();
            if prefix.is_empty() {
                label.to_string()
            } else {
                format!("{}_{}", prefix, label)
            }
        };
        assert!(
            !label.starts_with(METRICS_PREFIX),
            "using runtime label is not allowed"
        );
        Self {
            label,
            executor: self.executor.clone(),
        }
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric) {
        // Prepare args
        let name = name.into();
        let help = help.into();

        // Register metric
        self.executor.auditor.register(&name, &help);
        let prefixed_name = {
            let prefix = &self.label;
            if prefix.is_empty() {
                name
            } else {
                format!("{}_{}", *prefix, name)
            }
        };
        self.executor
            .registry
            .borrow_mut()
            .register(prefixed_name, help, metric)
    }

    fn encode(&self) -> String {
        self.executor.auditor.encode();
        let mut buffer = String::new();
        encode(&mut buffer, &self.executor.registry.borrow()).expect("encoding failed");
        buffer
    }
}

impl RngCore for Context {
    fn next_u32(&mut self) -> u32 {
        self.executor.auditor.rand("next_u32");
        self.executor.rng.borrow_mut().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.executor.auditor.rand("next_u64");
        self.executor.rng.borrow_mut().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.executor.auditor.rand("fill_bytes");
        self.executor.rng.borrow_mut().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.executor.auditor.rand("try_fill_bytes");
        self.executor.rng.borrow_mut().try_fill_bytes(dest)
    }
}

impl CryptoRng for Context {}
