//! Choose the lower neighbor a compound is sent to.

use super::{Link, Links};
use crate::{Compound, Error, FunctionalUnit};
use std::{cell::Cell, rc::Rc};

/// Outgoing link strategy of a unit.
pub trait Connector: Link {
    /// Returns whether some lower neighbor accepts `compound`.
    fn has_acceptor(&self, compound: &Compound) -> bool;

    /// The lower neighbor `compound` is sent to.
    ///
    /// Callers must check [Connector::has_acceptor] first.
    ///
    /// # Panics
    ///
    /// Panics if no neighbor accepts `compound`.
    fn get_acceptor(&self, compound: &Compound) -> Rc<FunctionalUnit>;

    /// Send `compound` to the neighbor picked by [Connector::get_acceptor].
    fn send_data(&self, compound: Compound) {
        self.get_acceptor(&compound).send_data(compound);
    }
}

/// Exactly one lower neighbor.
#[derive(Default)]
pub struct Single {
    links: Links,
}

impl Link for Single {
    fn links(&self) -> &Links {
        &self.links
    }

    fn admit(&self, kept: usize, incoming: &[Rc<FunctionalUnit>]) -> Result<(), Error> {
        super::admit_one("single connector", kept, incoming)
    }
}

impl Connector for Single {
    /// # Panics
    ///
    /// Panics if no neighbor is registered.
    fn has_acceptor(&self, compound: &Compound) -> bool {
        self.get_acceptor(compound).is_accepting(compound)
    }

    fn get_acceptor(&self, _compound: &Compound) -> Rc<FunctionalUnit> {
        self.links.first().expect("single connector has no neighbor")
    }
}

/// Rotate over the lower neighbors, skipping those that refuse.
///
/// The scan starts after the neighbor picked last, so every accepting
/// neighbor is served in turn.
#[derive(Default)]
pub struct RoundRobin {
    links: Links,
    next: Cell<usize>,
}

impl RoundRobin {
    fn find(
        &self,
        accepts: impl Fn(&FunctionalUnit) -> bool,
    ) -> Option<(usize, Rc<FunctionalUnit>)> {
        let fus = self.links.get();
        if fus.is_empty() {
            return None;
        }
        let start = self.next.get() % fus.len();
        (0..fus.len())
            .map(|offset| (start + offset) % fus.len())
            .find(|&index| accepts(fus[index].as_ref()))
            .map(|index| (index, fus[index].clone()))
    }
}

impl Link for RoundRobin {
    fn links(&self) -> &Links {
        &self.links
    }

    fn clear(&self) {
        self.links.clear();
        self.next.set(0);
    }
}

impl Connector for RoundRobin {
    fn has_acceptor(&self, compound: &Compound) -> bool {
        self.find(|fu| fu.is_accepting(compound)).is_some()
    }

    fn get_acceptor(&self, compound: &Compound) -> Rc<FunctionalUnit> {
        let (index, fu) = self
            .find(|fu| fu.accepting(compound))
            .expect("round robin connector has no accepting neighbor");
        self.next.set(index + 1);
        fu
    }
}

/// The first lower neighbor (in registration order) that accepts.
#[derive(Default)]
pub struct FirstServe {
    links: Links,
}

impl FirstServe {
    fn find(&self, accepts: impl Fn(&FunctionalUnit) -> bool) -> Option<Rc<FunctionalUnit>> {
        self.links.get().into_iter().find(|fu| accepts(fu.as_ref()))
    }
}

impl Link for FirstServe {
    fn links(&self) -> &Links {
        &self.links
    }
}

impl Connector for FirstServe {
    fn has_acceptor(&self, compound: &Compound) -> bool {
        self.find(|fu| fu.is_accepting(compound)).is_some()
    }

    fn get_acceptor(&self, compound: &Compound) -> Rc<FunctionalUnit> {
        self.find(|fu| fu.accepting(compound))
            .expect("first serve connector has no accepting neighbor")
    }
}

/// Send a copy of every compound to each accepting lower neighbor.
#[derive(Default)]
pub struct Multi {
    links: Links,
}

impl Link for Multi {
    fn links(&self) -> &Links {
        &self.links
    }
}

impl Connector for Multi {
    fn has_acceptor(&self, compound: &Compound) -> bool {
        self.links
            .get()
            .iter()
            .any(|fu| fu.is_accepting(compound))
    }

    fn get_acceptor(&self, compound: &Compound) -> Rc<FunctionalUnit> {
        self.links
            .get()
            .into_iter()
            .find(|fu| fu.accepting(compound))
            .expect("multi connector has no accepting neighbor")
    }

    fn send_data(&self, compound: Compound) {
        let acceptors: Vec<_> = self
            .links
            .get()
            .into_iter()
            .filter(|fu| fu.accepting(&compound))
            .collect();
        assert!(
            !acceptors.is_empty(),
            "multi connector has no accepting neighbor"
        );
        for fu in acceptors {
            fu.send_data(compound.copy());
        }
    }
}
