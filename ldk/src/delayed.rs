//! Units that hold compounds back before passing them on.
//!
//! A [Delay] decides what to keep and what to release; [Delayed] turns it
//! into a [Handler] that pushes released compounds downwards whenever the
//! lower units accept, and wakes up the upper units when capacity frees up.

use crate::{Compound, FunctionalUnit, Handler};
use std::cell::Cell;

/// Queueing policy of a [Delayed] unit.
///
/// Implementations must not call into other units: [Delayed] does all the
/// forwarding.
pub trait Delay: 'static {
    /// Take an incoming compound (the default passes it straight up).
    fn process_incoming(&self, fu: &FunctionalUnit, compound: Compound) {
        fu.deliverer().on_data(compound);
    }

    /// Take an outgoing compound.
    fn process_outgoing(&self, fu: &FunctionalUnit, compound: Compound);

    /// Returns whether another outgoing compound fits.
    fn has_capacity(&self, fu: &FunctionalUnit) -> bool;

    /// Returns whether `compound` fits.
    fn accepts(&self, fu: &FunctionalUnit, _compound: &Compound) -> bool {
        self.has_capacity(fu)
    }

    /// The next compound to send, if any, without removing it.
    fn has_something_to_send(&self, fu: &FunctionalUnit) -> Option<Compound>;

    /// Remove and return the next compound to send.
    ///
    /// Only called after [Delay::has_something_to_send] returned a compound.
    fn get_something_to_send(&self, fu: &FunctionalUnit) -> Compound;

    /// Returns whether a requested suspension may take effect now.
    fn on_suspend(&self, _fu: &FunctionalUnit) -> bool {
        true
    }
}

/// Drives a [Delay].
pub struct Delayed<D: Delay> {
    inner: D,
    in_wakeup: Cell<bool>,
}

impl<D: Delay> Delayed<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            in_wakeup: Cell::new(false),
        }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn try_to_send(&self, fu: &FunctionalUnit) {
        while let Some(compound) = self.inner.has_something_to_send(fu) {
            if !fu.connector().has_acceptor(&compound) {
                break;
            }
            let compound = self.inner.get_something_to_send(fu);
            fu.connector().send_data(compound);
        }
        fu.try_suspend();

        // A wakeup from below must not recurse back into this unit
        if self.inner.has_capacity(fu) && !self.in_wakeup.get() {
            self.in_wakeup.set(true);
            fu.receptor().wakeup();
            self.in_wakeup.set(false);
        }
    }
}

impl<D: Delay> Handler for Delayed<D> {
    fn is_accepting(&self, fu: &FunctionalUnit, compound: &Compound) -> bool {
        self.inner.accepts(fu, compound)
    }

    fn send_data(&self, fu: &FunctionalUnit, compound: Compound) {
        self.inner.process_outgoing(fu, compound);
        self.try_to_send(fu);
    }

    fn on_data(&self, fu: &FunctionalUnit, compound: Compound) {
        self.inner.process_incoming(fu, compound);
    }

    fn wakeup(&self, fu: &FunctionalUnit) {
        self.try_to_send(fu);
    }

    fn on_suspend(&self, fu: &FunctionalUnit) -> bool {
        self.inner.on_suspend(fu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::stubs, Builder, CommandRegistry, Fun};
    use std::{cell::RefCell, collections::VecDeque, rc::Rc};
    use strata_runtime::deterministic::Executor;

    /// Holds one compound at a time.
    #[derive(Default)]
    struct Slot {
        held: RefCell<VecDeque<Compound>>,
    }

    impl Delay for Slot {
        fn process_outgoing(&self, _fu: &FunctionalUnit, compound: Compound) {
            self.held.borrow_mut().push_back(compound);
        }

        fn has_capacity(&self, _fu: &FunctionalUnit) -> bool {
            self.held.borrow().is_empty()
        }

        fn has_something_to_send(&self, _fu: &FunctionalUnit) -> Option<Compound> {
            self.held.borrow().front().cloned()
        }

        fn get_something_to_send(&self, _fu: &FunctionalUnit) -> Compound {
            self.held
                .borrow_mut()
                .pop_front()
                .expect("nothing to send")
        }
    }

    #[test]
    fn test_try_to_send() {
        let (_, context, _) = Executor::default();
        let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
        let upper = stubs(&fun, &["upper"]).unwrap().remove(0);
        fun.add(Builder::new("slot"), Delayed::new(Slot::default()))
            .unwrap();
        let lower = stubs(&fun, &["lower"]).unwrap().remove(0);
        fun.connect("upper", "slot").unwrap();
        fun.connect("slot", "lower").unwrap();
        let entry = fun.get("upper").unwrap();

        // Passes straight through while the lower unit accepts
        entry.send_data(fun.create_compound(None));
        assert_eq!(lower.sent().len(), 1);
        assert_eq!(upper.wakeup_called(), 1);

        // Held back while it refuses, which blocks the upper unit
        lower.close();
        entry.send_data(fun.create_compound(None));
        assert_eq!(lower.sent().len(), 1);
        assert!(!entry.is_accepting(&fun.create_compound(None)));

        // Released on wakeup
        lower.open(true);
        assert_eq!(lower.sent().len(), 2);
        assert!(entry.is_accepting(&fun.create_compound(None)));
        assert_eq!(upper.wakeup_called(), 2);

        // Incoming compounds pass straight up
        fun.get("lower").unwrap().on_data(fun.create_compound(None));
        assert_eq!(upper.received().len(), 1);
    }
}
