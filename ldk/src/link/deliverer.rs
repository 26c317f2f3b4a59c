//! Choose the upper neighbor a received compound is delivered to.

use super::{Link, Links};
use crate::{Command, CommandId, Compound, Error, Fun, FunctionalUnit};
use std::{
    any::{type_name, TypeId},
    cell::Cell,
    marker::PhantomData,
    rc::Rc,
};

/// Upward link strategy of a unit.
pub trait Deliverer: Link {
    /// Returns whether some upper neighbor can take `compound`.
    fn has_acceptor(&self, compound: &Compound) -> bool;

    /// The upper neighbor `compound` is delivered to.
    ///
    /// # Panics
    ///
    /// Panics if no neighbor can take `compound`.
    fn get_acceptor(&self, compound: &Compound) -> Rc<FunctionalUnit>;

    /// Deliver `compound` to the neighbor picked by
    /// [Deliverer::get_acceptor].
    fn on_data(&self, compound: Compound) {
        self.get_acceptor(&compound).on_data(compound);
    }
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
        super::admit_one("single deliverer", kept, incoming)
    }
}

impl Deliverer for Single {
    fn has_acceptor(&self, _compound: &Compound) -> bool {
        !self.links.is_empty()
    }

    fn get_acceptor(&self, _compound: &Compound) -> Rc<FunctionalUnit> {
        self.links.first().expect("single deliverer has no neighbor")
    }
}

/// Commands carrying the index of the upper neighbor to deliver to.
pub trait HasOpcode: Command {
    fn opcode(&self) -> usize;
}

/// Deliver to the upper neighbor whose registration index equals the opcode
/// found in the `C` command of the provider unit.
///
/// The provider is named at construction and resolved once the FUN is
/// complete.
pub struct Opcode<C: HasOpcode> {
    links: Links,
    provider: String,
    id: Cell<Option<CommandId>>,
    _command: PhantomData<C>,
}

impl<C: HasOpcode> Opcode<C> {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            links: Links::default(),
            provider: provider.into(),
            id: Cell::new(None),
            _command: PhantomData,
        }
    }

    /// Name of the unit whose command carries the opcode.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    fn opcode(&self, compound: &Compound) -> Option<usize> {
        let id = self.id.get()?;
        let command = compound.command::<C>(id).ok()?;
        Some(command.opcode())
    }
}

impl<C: HasOpcode> Link for Opcode<C> {
    fn links(&self) -> &Links {
        &self.links
    }

    fn on_fun_created(&self, _fu: &FunctionalUnit, fun: &Fun) -> Result<(), Error> {
        let provider = fun.get(&self.provider)?;
        if provider.command_type() != TypeId::of::<C>() {
            return Err(Error::ProviderCommand {
                provider: self.provider.clone(),
                expected: type_name::<C>(),
            });
        }
        self.id.set(Some(provider.command_id()));
        Ok(())
    }
}

impl<C: HasOpcode> Deliverer for Opcode<C> {
    fn has_acceptor(&self, compound: &Compound) -> bool {
        self.opcode(compound)
            .is_some_and(|opcode| opcode < self.links.len())
    }

    fn get_acceptor(&self, compound: &Compound) -> Rc<FunctionalUnit> {
        assert!(
            self.id.get().is_some(),
            "opcode deliverer: provider {} not resolved",
            self.provider
        );
        let opcode = self.opcode(compound).unwrap_or_else(|| {
            panic!(
                "opcode deliverer: compound carries no command of {}",
                self.provider
            )
        });
        let fus = self.links.get();
        let Some(fu) = fus.get(opcode) else {
            panic!(
                "opcode deliverer: no neighbor for opcode {opcode} ({} registered)",
                fus.len()
            );
        };
        fu.clone()
    }
}
