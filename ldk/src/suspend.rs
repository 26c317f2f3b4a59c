//! Gate halting the outgoing traffic of a unit on request.
//!
//! A controller asks a suspendable unit to suspend with
//! [FunctionalUnit::suspend]. The unit's handler decides through
//! [Handler::on_suspend](crate::Handler::on_suspend) when the transition may
//! actually happen (typically once its buffer is empty); the unit checks again
//! whenever it calls [FunctionalUnit::try_suspend]. Once suspended, the unit
//! refuses every compound until [FunctionalUnit::resume] reopens it.

use crate::{probe::Probe, FunctionalUnit};
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

/// Position of a unit's gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Compounds flow normally.
    Open,
    /// Suspension was requested but the handler has not agreed yet.
    Suspending,
    /// The unit refuses every compound.
    Suspended,
}

/// Observer notified once a requested suspension took effect.
pub trait SuspendedCallback {
    fn on_suspended(&self, fu: &FunctionalUnit);
}

/// Suspension state attached to a unit built with
/// [Builder::suspendable](crate::Builder::suspendable).
pub struct SuspendSupport {
    state: Cell<State>,
    controller: RefCell<Option<Rc<dyn SuspendedCallback>>>,
    probe: Option<Rc<dyn Probe>>,
}

impl SuspendSupport {
    pub(crate) fn new(probe: Option<Rc<dyn Probe>>) -> Self {
        Self {
            state: Cell::new(State::Open),
            controller: RefCell::new(None),
            probe,
        }
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub(crate) fn request(&self, fu: &str, controller: Rc<dyn SuspendedCallback>) {
        assert_eq!(
            self.state.get(),
            State::Open,
            "{fu}: suspension requested while not open"
        );
        self.state.set(State::Suspending);
        *self.controller.borrow_mut() = Some(controller);
    }

    /// Complete a requested suspension, returning the controller to notify.
    pub(crate) fn complete(&self, fu: &str) -> Option<Rc<dyn SuspendedCallback>> {
        self.state.set(State::Suspended);
        self.record(fu, 1.0);
        self.controller.borrow_mut().take()
    }

    pub(crate) fn reopen(&self, fu: &str) {
        let previous = self.state.replace(State::Open);
        self.controller.borrow_mut().take();
        if previous == State::Suspended {
            self.record(fu, 0.0);
        }
    }

    fn record(&self, fu: &str, value: f64) {
        if let Some(probe) = &self.probe {
            probe.put(value, &[("fu", fu)]);
        }
    }
}
