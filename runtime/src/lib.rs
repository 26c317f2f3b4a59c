//! Drive discrete-event simulations with a deterministic scheduler.
//!
//! This crate provides the single notion of time shared by every component of
//! a simulation. Work is expressed as events (callbacks bound to an absolute
//! time) that a scheduler executes in time order, breaking ties by insertion
//! order. Given the same seed and the same inputs, a run is reproducible down
//! to the order of every callback.
//!
//! # Terminology
//!
//! Each runtime is composed of an `Executor` and a `Context`. The `Executor`
//! creates a `Runner` that drives execution of the runtime. The `Context`
//! implements any number of the other traits to provide core functionality.
//!
//! # Status
//!
//! `strata-runtime` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use prometheus_client::registry::Metric;
use std::time::{Duration, SystemTime};
use thiserror::Error;

pub mod deterministic;
pub mod telemetry;
mod timeout;
pub use timeout::{Periodic, Timeout, Timeouts};

/// Prefix for runtime metrics.
const METRICS_PREFIX: &str = "runtime";

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid event handle: {0}")]
    InvalidHandle(&'static str),
}

/// Interface that any runtime must implement to start
/// running tasks.
pub trait Runner {
    /// Context handed to the root closure.
    type Context;

    /// Run the root closure (which typically schedules the initial events)
    /// and then process events until the queue drains or the runtime is
    /// stopped.
    fn start<F, T>(self, f: F) -> T
    where
        F: FnOnce(Self::Context) -> T;
}

/// Interface that any scheduler must implement to provide
/// the current simulation time.
pub trait Clock: Clone + 'static {
    /// Returns the current simulation time.
    ///
    /// Time starts at the Unix epoch and never decreases.
    fn current(&self) -> SystemTime;
}

/// Interface to insert and remove events.
///
/// Events scheduled for the same instant execute in the order in which they
/// were inserted. An event runs at most once.
pub trait Scheduler: Clock {
    /// Handle to a scheduled event.
    type Event: Clone + 'static;

    /// Schedule `f` at the current time, after every event already queued for
    /// the current time.
    fn schedule_now<F>(&self, f: F) -> Self::Event
    where
        F: FnOnce(Self) + 'static;

    /// Schedule `f` to run `delay` after the current time.
    fn schedule_delay<F>(&self, delay: Duration, f: F) -> Self::Event
    where
        F: FnOnce(Self) + 'static;

    /// Schedule `f` to run at the absolute time `at`.
    ///
    /// # Panics
    ///
    /// Panics if `at` lies before the current time.
    fn schedule_at<F>(&self, at: SystemTime, f: F) -> Self::Event
    where
        F: FnOnce(Self) + 'static;

    /// Cancel a queued event.
    ///
    /// # Panics
    ///
    /// Panics if the event is running, has already run, or was already
    /// canceled.
    fn cancel(&self, event: &Self::Event) {
        if let Err(err) = self.try_cancel(event) {
            panic!("{err}");
        }
    }

    /// Cancel a queued event, returning an error instead of panicking if the
    /// handle no longer refers to a queued event.
    fn try_cancel(&self, event: &Self::Event) -> Result<(), Error>;

    /// Number of events that are queued and not canceled.
    fn pending(&self) -> usize;
}

/// Interface to register and encode metrics.
pub trait Metrics: Clone + 'static {
    /// Get the current label of the context.
    fn label(&self) -> String;

    /// Create a new instance of `Metrics` with the given label appended to the end
    /// of the current `Metrics` label.
    ///
    /// This is commonly used to create a nested context for `register`.
    ///
    /// It is not permitted for any implementation to use `METRICS_PREFIX` as the start of a
    /// label (reserved for metrics for the runtime).
    fn with_label(&self, label: &str) -> Self;

    /// Prefix the given label with the current context's label.
    ///
    /// Unlike `with_label`, this method does not create a new context.
    fn scoped_label(&self, label: &str) -> String {
        let label = if self.label().is_empty() {
            label.to_string()
        } else {
            format!("{}_{}", self.label(), label)
        };
        assert!(
            !label.starts_with(METRICS_PREFIX),
            "using runtime label is not allowed"
        );
        label
    }

    /// Register a metric with the runtime.
    ///
    /// Any registered metric will include (as a prefix) the label of the current context.
    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric);

    /// Encode all metrics into a buffer.
    fn encode(&self) -> String;
}

/// Observer of scheduler activity.
///
/// Monitors are a side channel (progress bars, statistics, debugging) and are
/// never required for correctness. Every method defaults to a no-op.
pub trait Monitor {
    /// An event was scheduled for the current time.
    fn on_schedule_now(&self, _now: SystemTime) {}

    /// An event was scheduled `delay` after `now`.
    fn on_schedule_delay(&self, _now: SystemTime, _delay: Duration) {}

    /// An event was scheduled for the absolute time `at`.
    fn on_schedule_at(&self, _now: SystemTime, _at: SystemTime) {}

    /// A queued event was canceled.
    fn on_cancel(&self, _now: SystemTime) {}

    /// An event finished executing at `now`.
    fn on_process_one_event(&self, _now: SystemTime) {}
}
