//! Finite outgoing queues, meant to be driven by [Delayed](crate::delayed::Delayed).
//!
//! [Bounded] exerts backpressure: once full it refuses compounds until the
//! lower units drain it. [Dropping] never refuses and discards compounds
//! instead.

use crate::{delayed::Delay, probe::Probe, Bits, Compound, Error, FunctionalUnit};
use serde::Deserialize;
use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};
use strata_utils::config::View;
use tracing::debug;

/// How the occupancy of a buffer is measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeUnit {
    /// Number of compounds.
    Compounds,
    /// Sum of the compounds' lengths.
    Bits,
}

impl SizeUnit {
    fn weight(&self, compound: &Compound) -> Bits {
        match self {
            SizeUnit::Compounds => 1,
            SizeUnit::Bits => compound.length_bits(),
        }
    }
}

/// FIFO keeping track of its occupancy.
struct Queue {
    unit: SizeUnit,
    entries: RefCell<VecDeque<(Compound, Bits)>>,
    occupancy: Cell<Bits>,
}

impl Queue {
    fn new(unit: SizeUnit) -> Self {
        Self {
            unit,
            entries: RefCell::new(VecDeque::new()),
            occupancy: Cell::new(0),
        }
    }

    fn push(&self, compound: Compound) {
        let weight = self.unit.weight(&compound);
        self.entries.borrow_mut().push_back((compound, weight));
        self.occupancy.set(self.occupancy.get() + weight);
    }

    fn front(&self) -> Option<Compound> {
        self.entries
            .borrow()
            .front()
            .map(|(compound, _)| compound.clone())
    }

    fn pop_front(&self) -> Option<Compound> {
        let (compound, weight) = self.entries.borrow_mut().pop_front()?;
        self.occupancy.set(self.occupancy.get() - weight);
        Some(compound)
    }

    fn pop_back(&self) -> Option<Compound> {
        let (compound, weight) = self.entries.borrow_mut().pop_back()?;
        self.occupancy.set(self.occupancy.get() - weight);
        Some(compound)
    }

    fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

#[derive(Deserialize)]
struct Config {
    size: Bits,
    #[serde(default = "default_unit")]
    unit: SizeUnit,
}

fn default_unit() -> SizeUnit {
    SizeUnit::Compounds
}

/// Buffer refusing compounds once full.
pub struct Bounded {
    size: Bits,
    queue: Queue,
}

impl Bounded {
    /// A buffer holding up to `size` (measured in `unit`).
    pub fn new(size: Bits, unit: SizeUnit) -> Self {
        Self {
            size,
            queue: Queue::new(unit),
        }
    }

    /// Buffer configured by the `size` and `unit` keys.
    pub fn from_config(view: &View) -> Result<Self, Error> {
        let config: Config = view.deserialize()?;
        Ok(Self::new(config.size, config.unit))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.len() == 0
    }

    pub fn occupancy(&self) -> Bits {
        self.queue.occupancy.get()
    }
}

impl Delay for Bounded {
    fn process_outgoing(&self, _fu: &FunctionalUnit, compound: Compound) {
        self.queue.push(compound);
    }

    fn has_capacity(&self, _fu: &FunctionalUnit) -> bool {
        self.occupancy() < self.size
    }

    fn accepts(&self, _fu: &FunctionalUnit, compound: &Compound) -> bool {
        self.occupancy() + self.queue.unit.weight(compound) <= self.size
    }

    fn has_something_to_send(&self, _fu: &FunctionalUnit) -> Option<Compound> {
        self.queue.front()
    }

    fn get_something_to_send(&self, fu: &FunctionalUnit) -> Compound {
        self.queue
            .pop_front()
            .unwrap_or_else(|| panic!("{}: nothing to send", fu.name()))
    }

    fn on_suspend(&self, _fu: &FunctionalUnit) -> bool {
        self.is_empty()
    }
}

/// Which compound a full [Dropping] buffer discards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPolicy {
    /// The compound that just arrived.
    Tail,
    /// The oldest buffered compound.
    Front,
}

#[derive(Deserialize)]
struct DroppingConfig {
    size: Bits,
    #[serde(default = "default_unit")]
    unit: SizeUnit,
    #[serde(default = "default_policy")]
    drop: DropPolicy,
}

fn default_policy() -> DropPolicy {
    DropPolicy::Tail
}

/// Buffer that always accepts and discards compounds once full.
pub struct Dropping {
    size: Bits,
    policy: DropPolicy,
    queue: Queue,
    dropped: Cell<u64>,
    probe: Option<Rc<dyn Probe>>,
}

impl Dropping {
    pub fn new(size: Bits, unit: SizeUnit, policy: DropPolicy) -> Self {
        Self {
            size,
            policy,
            queue: Queue::new(unit),
            dropped: Cell::new(0),
            probe: None,
        }
    }

    /// Buffer configured by the `size`, `unit` and `drop` keys.
    pub fn from_config(view: &View) -> Result<Self, Error> {
        let config: DroppingConfig = view.deserialize()?;
        Ok(Self::new(config.size, config.unit, config.drop))
    }

    /// Record the length of every dropped compound in `probe`.
    pub fn with_probe(mut self, probe: Rc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Number of dropped compounds.
    pub fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.len() == 0
    }
}

impl Delay for Dropping {
    fn process_outgoing(&self, fu: &FunctionalUnit, compound: Compound) {
        self.queue.push(compound);
        while self.queue.occupancy.get() > self.size {
            let dropped = match self.policy {
                DropPolicy::Tail => self.queue.pop_back(),
                DropPolicy::Front => self.queue.pop_front(),
            };
            let Some(dropped) = dropped else {
                break;
            };
            self.dropped.set(self.dropped.get() + 1);
            debug!(fu = fu.name(), length = dropped.length_bits(), "dropped compound");
            if let Some(probe) = &self.probe {
                probe.put(dropped.length_bits() as f64, &[("fu", fu.name())]);
            }
        }
    }

    fn has_capacity(&self, _fu: &FunctionalUnit) -> bool {
        true
    }

    fn has_something_to_send(&self, _fu: &FunctionalUnit) -> Option<Compound> {
        self.queue.front()
    }

    fn get_something_to_send(&self, fu: &FunctionalUnit) -> Compound {
        self.queue
            .pop_front()
            .unwrap_or_else(|| panic!("{}: nothing to send", fu.name()))
    }

    fn on_suspend(&self, _fu: &FunctionalUnit) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{delayed::Delayed, probe::Recorder, tools::stubs, Builder, CommandRegistry, Fun};
    use bytes::Bytes;
    use strata_runtime::deterministic::Executor;

    fn stack<D: Delay>(buffer: D) -> (Fun, Rc<crate::tools::Stub>, Rc<crate::tools::Stub>) {
        let (_, context, _) = Executor::default();
        let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
        let upper = stubs(&fun, &["upper"]).unwrap().remove(0);
        fun.add(Builder::new("buffer"), Delayed::new(buffer)).unwrap();
        let lower = stubs(&fun, &["lower"]).unwrap().remove(0);
        fun.connect("upper", "buffer").unwrap();
        fun.connect("buffer", "lower").unwrap();
        (fun, upper, lower)
    }

    #[test]
    fn test_bounded_backpressure() {
        let (fun, upper, lower) = stack(Bounded::new(2, SizeUnit::Compounds));
        let entry = fun.get("upper").unwrap();
        lower.close();
        for _ in 0..2 {
            assert!(entry.is_accepting(&fun.create_compound(None)));
            entry.send_data(fun.create_compound(None));
        }
        assert!(!entry.is_accepting(&fun.create_compound(None)));
        let buffer = fun.find_friend::<Delayed<Bounded>>("buffer").unwrap();
        assert_eq!(buffer.inner().len(), 2);

        // Draining wakes the upper unit
        let wakeups = upper.wakeup_called();
        lower.open(true);
        assert_eq!(lower.sent().len(), 2);
        assert!(buffer.inner().is_empty());
        assert_eq!(upper.wakeup_called(), wakeups + 1);
        assert!(entry.is_accepting(&fun.create_compound(None)));
    }

    #[test]
    fn test_bounded_bits() {
        let (fun, _, lower) = stack(Bounded::new(100, SizeUnit::Bits));
        let entry = fun.get("upper").unwrap();
        lower.close();
        entry.send_data(fun.create_compound(Some(Bytes::from(vec![0u8; 10]))));
        let buffer = fun.find_friend::<Delayed<Bounded>>("buffer").unwrap();
        assert_eq!(buffer.inner().occupancy(), 80);

        // 80 + 24 does not fit, 80 + 16 does
        assert!(!entry.is_accepting(&fun.create_compound(Some(Bytes::from(vec![0u8; 3])))));
        assert!(entry.is_accepting(&fun.create_compound(Some(Bytes::from(vec![0u8; 2])))));
    }

    #[test]
    fn test_dropping_tail() {
        let (fun, _, lower) = stack(Dropping::new(1, SizeUnit::Compounds, DropPolicy::Tail));
        let entry = fun.get("upper").unwrap();
        lower.close();
        let first = fun.create_compound(None);
        entry.send_data(first.clone());
        entry.send_data(fun.create_compound(None));
        assert!(entry.is_accepting(&fun.create_compound(None)));

        let buffer = fun.find_friend::<Delayed<Dropping>>("buffer").unwrap();
        assert_eq!(buffer.inner().dropped(), 1);
        lower.open(true);
        assert_eq!(lower.sent().len(), 1);
        assert!(lower.sent()[0].same(&first));
    }

    #[test]
    fn test_dropping_front() {
        let recorder = Rc::new(Recorder::default());
        let buffer = Dropping::new(1, SizeUnit::Compounds, DropPolicy::Front).with_probe(recorder.clone());
        let (fun, _, lower) = stack(buffer);
        let entry = fun.get("upper").unwrap();
        lower.close();
        entry.send_data(fun.create_compound(None));
        let last = fun.create_compound(Some(Bytes::from_static(b"x")));
        entry.send_data(last.clone());

        lower.open(true);
        assert!(lower.sent()[0].same(&last));
        assert_eq!(recorder.values(), vec![0.0]);
    }

    #[test]
    fn test_from_config() {
        let view = View::parse("{size: 4, unit: bits}").unwrap();
        let bounded = Bounded::from_config(&view).unwrap();
        assert_eq!(bounded.size, 4);
        assert_eq!(bounded.queue.unit, SizeUnit::Bits);

        let view = View::parse("{size: 4, drop: front}").unwrap();
        let dropping = Dropping::from_config(&view).unwrap();
        assert_eq!(dropping.policy, DropPolicy::Front);
        assert_eq!(dropping.queue.unit, SizeUnit::Compounds);

        assert!(Bounded::from_config(&View::parse("unit: bits").unwrap()).is_err());
        assert!(Bounded::from_config(&View::parse("{size: 1, unit: bytes}").unwrap()).is_err());
    }
}
