//! Strategies connecting a functional unit to its neighbors.
//!
//! Every unit owns one [Connector] (lower neighbors it sends to), one
//! [Receptor] (upper neighbors it wakes up) and one [Deliverer] (upper
//! neighbors it delivers to). Strategies hold non-owning handles: the [Fun]
//! owns the units, and a neighbor that has been removed from its FUN simply
//! disappears from the strategies once dropped.
//!
//! Strategies are plain values and may be chosen independently per unit,
//! either in code or from a configuration (see [connector_from],
//! [receptor_from] and [deliverer_from]).

use crate::{multiplexer::OpcodeCommand, Error, Fun, FunctionalUnit};
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
    slice,
};
use strata_utils::config::View;

pub mod connector;
pub use connector::Connector;
pub mod deliverer;
pub use deliverer::Deliverer;
pub mod receptor;
pub use receptor::Receptor;

/// Registration-ordered, non-owning list of neighbors.
#[derive(Default)]
pub struct Links {
    fus: RefCell<Vec<Weak<FunctionalUnit>>>,
}

impl Links {
    pub fn push(&self, fu: &Rc<FunctionalUnit>) {
        self.fus.borrow_mut().push(Rc::downgrade(fu));
    }

    pub fn clear(&self) {
        self.fus.borrow_mut().clear();
    }

    /// Neighbors that are still alive, in registration order.
    ///
    /// Returns a snapshot so that callers never hold a borrow while calling
    /// into a neighbor.
    pub fn get(&self) -> Vec<Rc<FunctionalUnit>> {
        self.fus.borrow().iter().filter_map(Weak::upgrade).collect()
    }

    /// The first neighbor that is still alive.
    pub fn first(&self) -> Option<Rc<FunctionalUnit>> {
        self.fus.borrow().iter().find_map(Weak::upgrade)
    }

    pub fn len(&self) -> usize {
        self.fus
            .borrow()
            .iter()
            .filter(|fu| fu.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration interface shared by every strategy.
pub trait Link {
    /// Neighbor storage of the strategy.
    fn links(&self) -> &Links;

    /// Check that `incoming` may be registered next to `kept` neighbors.
    fn admit(&self, _kept: usize, _incoming: &[Rc<FunctionalUnit>]) -> Result<(), Error> {
        Ok(())
    }

    /// Check that [Link::add] would register `fu`, without registering it.
    fn can_add(&self, fu: &Rc<FunctionalUnit>) -> Result<(), Error> {
        self.admit(self.size(), slice::from_ref(fu))
    }

    /// Register a neighbor.
    fn add(&self, fu: &Rc<FunctionalUnit>) -> Result<(), Error> {
        self.can_add(fu)?;
        self.links().push(fu);
        Ok(())
    }

    /// Forget every neighbor.
    fn clear(&self) {
        self.links().clear();
    }

    /// Registered neighbors that are still alive.
    fn get(&self) -> Vec<Rc<FunctionalUnit>> {
        self.links().get()
    }

    /// Replace the registered neighbors. On error the previous neighbors
    /// are kept.
    fn set(&self, fus: &[Rc<FunctionalUnit>]) -> Result<(), Error> {
        self.admit(0, fus)?;
        self.clear();
        for fu in fus {
            self.links().push(fu);
        }
        Ok(())
    }

    /// Number of registered neighbors that are still alive.
    fn size(&self) -> usize {
        self.links().len()
    }

    /// Resolve names once every unit of `fun` exists.
    fn on_fun_created(&self, _fu: &FunctionalUnit, _fun: &Fun) -> Result<(), Error> {
        Ok(())
    }
}

/// Admission rule of strategies holding at most one neighbor.
fn admit_one(
    strategy: &'static str,
    kept: usize,
    incoming: &[Rc<FunctionalUnit>],
) -> Result<(), Error> {
    match incoming.get(1usize.saturating_sub(kept)) {
        Some(fu) if kept + incoming.len() > 1 => Err(Error::TooManyLinks {
            strategy,
            fu: fu.name().to_string(),
        }),
        _ => Ok(()),
    }
}

fn strategy(view: &View) -> Result<String, Error> {
    Ok(view.get_or("type", "single".to_string())?)
}

/// Build a connector from a view (`type`: `single`, `round_robin`,
/// `first_serve` or `multi`).
pub fn connector_from(view: &View) -> Result<Box<dyn Connector>, Error> {
    Ok(match strategy(view)?.as_str() {
        "single" => Box::new(connector::Single::default()),
        "round_robin" => Box::new(connector::RoundRobin::default()),
        "first_serve" => Box::new(connector::FirstServe::default()),
        "multi" => Box::new(connector::Multi::default()),
        other => return Err(Error::UnknownStrategy(other.to_string())),
    })
}

/// Build a receptor from a view (`type`: `single`, `multi` or
/// `round_robin`).
pub fn receptor_from(view: &View) -> Result<Box<dyn Receptor>, Error> {
    Ok(match strategy(view)?.as_str() {
        "single" => Box::new(receptor::Single::default()),
        "multi" => Box::new(receptor::Multi::default()),
        "round_robin" => Box::new(receptor::RoundRobin::default()),
        other => return Err(Error::UnknownStrategy(other.to_string())),
    })
}

/// Build a deliverer from a view (`type`: `single`, or `opcode` with the
/// name of the unit providing the opcode in `provider`).
pub fn deliverer_from(view: &View) -> Result<Box<dyn Deliverer>, Error> {
    Ok(match strategy(view)?.as_str() {
        "single" => Box::new(deliverer::Single::default()),
        "opcode" => {
            let provider: String = view.get("provider")?;
            Box::new(deliverer::Opcode::<OpcodeCommand>::new(provider))
        }
        other => return Err(Error::UnknownStrategy(other.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let view = View::parse("type: round_robin").unwrap();
        assert!(connector_from(&view).is_ok());
        assert!(receptor_from(&view).is_ok());
        assert!(matches!(
            deliverer_from(&view),
            Err(Error::UnknownStrategy(name)) if name == "round_robin"
        ));

        // Defaults to a single link
        assert!(connector_from(&View::empty()).is_ok());

        // The opcode deliverer needs a provider
        let view = View::parse("type: opcode").unwrap();
        assert!(matches!(deliverer_from(&view), Err(Error::Config(_))));
        let view = View::parse("{type: opcode, provider: dispatcher}").unwrap();
        assert!(deliverer_from(&view).is_ok());
    }
}
