//! Units for testing stacks.

use crate::{Bits, Command, Compound, Error, Fun, FunctionalUnit, Handler, Sizes};
use std::{
    any::TypeId,
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::{Rc, Weak},
    time::SystemTime,
};
use strata_runtime::Clock;
use strata_utils::config::View;

/// Command of the [Stub].
#[derive(Clone, Debug, Default)]
pub struct StubCommand {
    pub local: StubLocal,
    pub magic: StubMagic,
}

#[derive(Clone, Debug, Default)]
pub struct StubLocal {
    /// Bits added to the command pool size.
    pub add_pci: Bits,
    /// Bits added to the data size.
    pub add_pdu: Bits,
}

#[derive(Clone, Debug, Default)]
pub struct StubMagic {
    pub send_data_time: Option<SystemTime>,
    pub on_data_time: Option<SystemTime>,
}

impl Command for StubCommand {
    fn sizes(&self, above: Sizes) -> Sizes {
        Sizes {
            command_pool: above.command_pool + self.local.add_pci,
            data: above.data + self.local.add_pdu,
        }
    }
}

/// Records every compound passing through and forwards it if a neighbor is
/// connected.
///
/// A stub accepts until [Stub::close]d. Stamps a [StubCommand] on every
/// compound when the unit declares it.
pub struct Stub {
    accepting: Cell<bool>,
    stepping: Cell<bool>,
    add_pci: Cell<Bits>,
    add_pdu: Cell<Bits>,
    sent: RefCell<VecDeque<Compound>>,
    received: RefCell<VecDeque<Compound>>,
    wakeups: Cell<usize>,
    created: Cell<usize>,
    fu: RefCell<Weak<FunctionalUnit>>,
}

impl Default for Stub {
    fn default() -> Self {
        Self {
            accepting: Cell::new(true),
            stepping: Cell::new(false),
            add_pci: Cell::new(0),
            add_pdu: Cell::new(0),
            sent: RefCell::new(VecDeque::new()),
            received: RefCell::new(VecDeque::new()),
            wakeups: Cell::new(0),
            created: Cell::new(0),
            fu: RefCell::new(Weak::new()),
        }
    }
}

impl Stub {
    /// Stub configured by the `accepting`, `add_pci` and `add_pdu` keys.
    pub fn from_config(view: &View) -> Result<Self, Error> {
        let stub = Self::default();
        stub.accepting.set(view.get_or("accepting", true)?);
        stub.set_sizes(view.get_or("add_pci", 0)?, view.get_or("add_pdu", 0)?);
        Ok(stub)
    }

    /// Compounds sent through the stub, oldest first.
    pub fn sent(&self) -> Vec<Compound> {
        self.sent.borrow().iter().cloned().collect()
    }

    /// Compounds delivered to the stub, oldest first.
    pub fn received(&self) -> Vec<Compound> {
        self.received.borrow().iter().cloned().collect()
    }

    /// Forget every recorded compound.
    pub fn flush(&self) {
        self.sent.borrow_mut().clear();
        self.received.borrow_mut().clear();
    }

    /// Accept compounds again, waking up the stub's unit if `wakeup` is set.
    pub fn open(&self, wakeup: bool) {
        self.accepting.set(true);
        if !wakeup {
            return;
        }
        let fu = self.fu.borrow().upgrade();
        if let Some(fu) = fu {
            fu.wakeup();
        }
    }

    /// Refuse every compound.
    pub fn close(&self) {
        self.accepting.set(false);
    }

    /// Accept exactly one compound.
    pub fn step(&self) {
        self.stepping.set(true);
        self.open(true);
    }

    pub fn is_open(&self) -> bool {
        self.accepting.get()
    }

    /// Sizes added by the stamped [StubCommand].
    pub fn set_sizes(&self, add_pci: Bits, add_pdu: Bits) {
        self.add_pci.set(add_pci);
        self.add_pdu.set(add_pdu);
    }

    /// Number of wakeups received.
    pub fn wakeup_called(&self) -> usize {
        self.wakeups.get()
    }

    /// Number of times the FUN announced its creation.
    pub fn fun_created(&self) -> usize {
        self.created.get()
    }

    fn stamp(&self, fu: &FunctionalUnit, compound: &Compound, outgoing: bool) {
        if fu.command_type() != TypeId::of::<StubCommand>() {
            return;
        }
        let now = fu.context().current();
        let mut command = fu.activate_command::<StubCommand>(compound);
        if outgoing {
            command.local.add_pci = self.add_pci.get();
            command.local.add_pdu = self.add_pdu.get();
            command.magic.send_data_time = Some(now);
        } else {
            command.magic.on_data_time = Some(now);
        }
    }
}

impl Handler for Stub {
    fn is_accepting(&self, fu: &FunctionalUnit, compound: &Compound) -> bool {
        self.accepting.get()
            && (fu.connector().size() == 0 || fu.connector().has_acceptor(compound))
    }

    fn send_data(&self, fu: &FunctionalUnit, compound: Compound) {
        self.stamp(fu, &compound, true);
        self.sent.borrow_mut().push_back(compound.clone());
        if self.stepping.replace(false) {
            self.close();
        }
        if fu.connector().size() > 0 {
            fu.connector().send_data(compound);
        }
    }

    fn on_data(&self, fu: &FunctionalUnit, compound: Compound) {
        self.stamp(fu, &compound, false);
        self.received.borrow_mut().push_back(compound.clone());
        if fu.deliverer().size() > 0 {
            fu.deliverer().on_data(compound);
        }
    }

    fn wakeup(&self, fu: &FunctionalUnit) {
        self.wakeups.set(self.wakeups.get() + 1);
        fu.receptor().wakeup();
    }

    fn attach(&self, fu: Weak<FunctionalUnit>) {
        *self.fu.borrow_mut() = fu;
    }

    fn on_fun_created(&self, _fu: &FunctionalUnit, _fun: &Fun) -> Result<(), Error> {
        self.created.set(self.created.get() + 1);
        Ok(())
    }
}

/// Stub units and their handlers for quick test set-ups.
pub fn stubs(fun: &Fun, names: &[&str]) -> Result<Vec<Rc<Stub>>, Error> {
    names
        .iter()
        .map(|name| {
            fun.add(
                crate::Builder::new(*name).command::<StubCommand>(),
                Stub::default(),
            )?;
            fun.find_friend::<Stub>(name)
        })
        .collect()
}
