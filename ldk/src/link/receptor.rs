//! Fan wakeups out to the upper neighbors.

use super::{Link, Links};
use crate::{Error, FunctionalUnit};
use std::{cell::Cell, rc::Rc};

/// Incoming link strategy used to signal free capacity upwards.
pub trait Receptor: Link {
    /// Wake up the upper neighbors.
    fn wakeup(&self);
}

/// At most one upper neighbor.
#[derive(Default)]
pub struct Single {
    links: Links,
}

impl Link for Single {
    fn links(&self) -> &Links {
        &self.links
    }

    fn admit(&self, kept: usize, incoming: &[Rc<FunctionalUnit>]) -> Result<(), Error> {
        super::admit_one("single receptor", kept, incoming)
    }
}

impl Receptor for Single {
    fn wakeup(&self) {
        if let Some(fu) = self.links.first() {
            fu.wakeup();
        }
    }
}

/// Wake every upper neighbor, in registration order.
#[derive(Default)]
pub struct Multi {
    links: Links,
}

impl Link for Multi {
    fn links(&self) -> &Links {
        &self.links
    }
}

impl Receptor for Multi {
    fn wakeup(&self) {
        for fu in self.links.get() {
            fu.wakeup();
        }
    }
}

/// Wake every upper neighbor, starting one further on each call.
///
/// The neighbor woken first gets the first chance to use the capacity, so
/// rotating the start keeps one neighbor from starving the others.
#[derive(Default)]
pub struct RoundRobin {
    links: Links,
    next: Cell<usize>,
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

impl Receptor for RoundRobin {
    fn wakeup(&self) {
        let fus = self.links.get();
        if fus.is_empty() {
            return;
        }
        let start = self.next.get() % fus.len();
        self.next.set(start + 1);
        for offset in 0..fus.len() {
            fus[(start + offset) % fus.len()].wakeup();
        }
    }
}
