//! Timers built on top of a [Scheduler].
//!
//! A timer owns at most one queued event per slot and clears the slot before
//! running the callback, so callbacks may re-arm the timer that fired them.
//! Dropping a timer cancels whatever it still has queued.

use crate::Scheduler;
use std::{cell::RefCell, collections::BTreeMap, rc::Rc, time::Duration};
use tracing::trace;

/// A single-shot timeout.
pub struct Timeout<E: Scheduler> {
    context: E,
    slot: Rc<RefCell<Option<E::Event>>>,
}

impl<E: Scheduler> Timeout<E> {
    pub fn new(context: E) -> Self {
        Self {
            context,
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Arm the timeout.
    ///
    /// # Panics
    ///
    /// Panics if the timeout is already set.
    pub fn set<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce(E) + 'static,
    {
        assert!(!self.is_set(), "timeout already set");
        let slot = self.slot.clone();
        let event = self.context.schedule_delay(delay, move |context| {
            slot.borrow_mut().take();
            f(context);
        });
        *self.slot.borrow_mut() = Some(event);
    }

    /// Arm the timeout, replacing any pending one.
    pub fn set_new<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce(E) + 'static,
    {
        if self.is_set() {
            self.cancel();
        }
        self.set(delay, f);
    }

    pub fn is_set(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Cancel the pending timeout.
    ///
    /// # Panics
    ///
    /// Panics if the timeout is not set.
    pub fn cancel(&self) {
        let event = self.slot.borrow_mut().take();
        let Some(event) = event else {
            panic!("timeout not set");
        };
        self.context.cancel(&event);
    }
}

impl<E: Scheduler> Drop for Timeout<E> {
    fn drop(&mut self) {
        if let Some(event) = self.slot.borrow_mut().take() {
            let _ = self.context.try_cancel(&event);
        }
    }
}

/// A callback that fires every `period` until stopped.
pub struct Periodic<E: Scheduler> {
    context: E,
    period: Duration,
    slot: Rc<RefCell<Option<E::Event>>>,
}

impl<E: Scheduler> Periodic<E> {
    /// Create a stopped periodic timer.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero.
    pub fn new(context: E, period: Duration) -> Self {
        assert!(!period.is_zero(), "period must be non-zero");
        Self {
            context,
            period,
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Fire `f` after `delay` and then every period.
    ///
    /// # Panics
    ///
    /// Panics if the timer is already running.
    pub fn start<F>(&self, delay: Duration, f: F)
    where
        F: FnMut(E) + 'static,
    {
        assert!(!self.is_running(), "periodic timer already running");
        arm(
            &self.context,
            delay,
            self.period,
            self.slot.clone(),
            Rc::new(RefCell::new(f)),
        );
    }

    pub fn is_running(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Stop the timer. A no-op if it is not running.
    pub fn stop(&self) {
        let event = self.slot.borrow_mut().take();
        if let Some(event) = event {
            self.context.cancel(&event);
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl<E: Scheduler> Drop for Periodic<E> {
    fn drop(&mut self) {
        if let Some(event) = self.slot.borrow_mut().take() {
            let _ = self.context.try_cancel(&event);
        }
    }
}

fn arm<E, F>(
    context: &E,
    delay: Duration,
    period: Duration,
    slot: Rc<RefCell<Option<E::Event>>>,
    f: Rc<RefCell<F>>,
) where
    E: Scheduler,
    F: FnMut(E) + 'static,
{
    let next = slot.clone();
    let event = context.schedule_delay(delay, move |context: E| {
        // Re-arm before running the callback so it can stop the timer
        arm(&context, period, period, next, f.clone());
        trace!(period = period.as_millis() as u64, "periodic timer fired");
        (*f.borrow_mut())(context);
    });
    *slot.borrow_mut() = Some(event);
}

/// Independent single-shot timeouts addressed by key.
pub struct Timeouts<K, E: Scheduler> {
    context: E,
    slots: Rc<RefCell<BTreeMap<K, E::Event>>>,
}

impl<K, E> Timeouts<K, E>
where
    K: Ord + Clone + 'static,
    E: Scheduler,
{
    pub fn new(context: E) -> Self {
        Self {
            context,
            slots: Rc::new(RefCell::new(BTreeMap::new())),
        }
    }

    /// Arm the timeout for `key`.
    ///
    /// # Panics
    ///
    /// Panics if a timeout is already set for `key`.
    pub fn set<F>(&self, key: K, delay: Duration, f: F)
    where
        F: FnOnce(E, K) + 'static,
    {
        assert!(!self.is_set(&key), "timeout already set for key");
        let slots = self.slots.clone();
        let fired = key.clone();
        let event = self.context.schedule_delay(delay, move |context| {
            slots.borrow_mut().remove(&fired);
            f(context, fired);
        });
        self.slots.borrow_mut().insert(key, event);
    }

    pub fn is_set(&self, key: &K) -> bool {
        self.slots.borrow().contains_key(key)
    }

    /// Cancel the timeout for `key`.
    ///
    /// # Panics
    ///
    /// Panics if no timeout is set for `key`.
    pub fn cancel(&self, key: &K) {
        let event = self.slots.borrow_mut().remove(key);
        let Some(event) = event else {
            panic!("timeout not set for key");
        };
        self.context.cancel(&event);
    }

    /// Cancel every pending timeout.
    pub fn cancel_all(&self) {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        for event in slots.values() {
            self.context.cancel(event);
        }
    }

    /// Number of pending timeouts.
    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.borrow().is_empty()
    }
}

impl<K, E: Scheduler> Drop for Timeouts<K, E> {
    fn drop(&mut self) {
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        for event in slots.values() {
            let _ = self.context.try_cancel(event);
        }
    }
}
