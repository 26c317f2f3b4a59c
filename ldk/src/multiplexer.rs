//! Share one lower unit between several upper units.
//!
//! Each upper unit is an [OpcodeSetter] stamping its opcode on the
//! [Dispatcher]'s command on the way down. On the way up the dispatcher's
//! [Opcode](crate::link::deliverer::Opcode) deliverer reads the opcode back
//! and routes the compound to the upper unit registered at that position.

use crate::{
    link::{
        deliverer::{HasOpcode, Opcode},
        receptor,
    },
    Bits, Builder, Command, Compound, Error, Fun, FunctionalUnit, Handler,
};
use std::{
    any::{type_name, TypeId},
    cell::RefCell,
    rc::{Rc, Weak},
};
use strata_utils::config::View;

/// Command of the [Dispatcher].
#[derive(Clone, Debug, Default)]
pub struct OpcodeCommand {
    pub local: OpcodeLocal,
    pub peer: OpcodePeer,
}

#[derive(Clone, Debug, Default)]
pub struct OpcodeLocal {
    /// Bits the opcode occupies on the wire.
    pub bits: Bits,
}

#[derive(Clone, Debug, Default)]
pub struct OpcodePeer {
    pub opcode: usize,
}

impl Command for OpcodeCommand {
    fn peer_size(&self) -> Bits {
        self.local.bits
    }
}

impl HasOpcode for OpcodeCommand {
    fn opcode(&self) -> usize {
        self.peer.opcode
    }
}

/// Transparent unit carrying the opcode of the upper unit a compound came
/// from.
#[derive(Default)]
pub struct Dispatcher;

impl Dispatcher {
    /// Declare an [OpcodeCommand] of `bits` bits, deliver by opcode and wake
    /// up every upper unit.
    pub fn configure(builder: Builder, bits: Bits) -> Builder {
        let provider = builder.name().to_string();
        builder
            .command_with(move || OpcodeCommand {
                local: OpcodeLocal { bits },
                ..OpcodeCommand::default()
            })
            .deliverer(Box::new(Opcode::<OpcodeCommand>::new(provider)))
            .receptor(Box::<receptor::Multi>::default())
    }

    /// Builder of a dispatcher called `name`.
    pub fn builder(name: &str, bits: Bits) -> Builder {
        Self::configure(Builder::new(name), bits)
    }
}

impl Handler for Dispatcher {}

/// Stamp a fixed opcode on the provider's [OpcodeCommand] of every outgoing
/// compound.
pub struct OpcodeSetter {
    provider: String,
    opcode: usize,
    resolved: RefCell<Weak<FunctionalUnit>>,
}

impl OpcodeSetter {
    pub fn new(provider: impl Into<String>, opcode: usize) -> Self {
        Self {
            provider: provider.into(),
            opcode,
            resolved: RefCell::new(Weak::new()),
        }
    }

    /// Setter configured by the `provider` and `opcode` keys.
    pub fn from_config(view: &View) -> Result<Self, Error> {
        Ok(Self::new(
            view.get::<String>("provider")?,
            view.get("opcode")?,
        ))
    }

    pub fn opcode(&self) -> usize {
        self.opcode
    }
}

impl Handler for OpcodeSetter {
    fn on_fun_created(&self, _fu: &FunctionalUnit, fun: &Fun) -> Result<(), Error> {
        let provider = fun.get(&self.provider)?;
        if provider.command_type() != TypeId::of::<OpcodeCommand>() {
            return Err(Error::ProviderCommand {
                provider: self.provider.clone(),
                expected: type_name::<OpcodeCommand>(),
            });
        }
        *self.resolved.borrow_mut() = Rc::downgrade(&provider);
        Ok(())
    }

    fn send_data(&self, fu: &FunctionalUnit, compound: Compound) {
        let Some(provider) = self.resolved.borrow().upgrade() else {
            panic!("{}: opcode provider {} not resolved", fu.name(), self.provider);
        };
        provider
            .activate_command::<OpcodeCommand>(&compound)
            .peer
            .opcode = self.opcode;
        fu.connector().send_data(compound);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::stubs, CommandRegistry, Factory};
    use strata_runtime::deterministic::Executor;

    fn stack() -> Fun {
        let (_, context, _) = Executor::default();
        let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
        stubs(&fun, &["top_a", "top_b", "lower"]).unwrap();
        fun.add(Builder::new("a"), OpcodeSetter::new("dispatcher", 0))
            .unwrap();
        fun.add(Builder::new("b"), OpcodeSetter::new("dispatcher", 1))
            .unwrap();
        fun.add(Dispatcher::builder("dispatcher", 2), Dispatcher)
            .unwrap();
        fun.connect("top_a", "a").unwrap();
        fun.connect("top_b", "b").unwrap();
        fun.connect("a", "dispatcher").unwrap();
        fun.connect("b", "dispatcher").unwrap();
        fun.connect("dispatcher", "lower").unwrap();
        fun.on_fun_created().unwrap();
        fun
    }

    #[test]
    fn test_multiplex_and_demultiplex() {
        let fun = stack();
        let dispatcher = fun.get("dispatcher").unwrap();
        fun.get("top_b").unwrap().send_data(fun.create_compound(None));
        fun.get("top_a").unwrap().send_data(fun.create_compound(None));

        let lower = fun.find_friend::<crate::tools::Stub>("lower").unwrap();
        let sent = lower.sent();
        assert_eq!(
            dispatcher.get_command::<OpcodeCommand>(&sent[0]).peer.opcode,
            1
        );
        assert_eq!(sent[0].length_bits(), 2);

        // Loop back up: each compound reaches the unit it came from
        for compound in sent {
            fun.get("lower").unwrap().on_data(compound);
        }
        let received = |name: &str| {
            fun.find_friend::<crate::tools::Stub>(name)
                .unwrap()
                .received()
                .len()
        };
        assert_eq!(received("top_a"), 1);
        assert_eq!(received("top_b"), 1);
    }

    #[test]
    fn test_wakeup_reaches_every_setter() {
        let fun = stack();
        fun.get("dispatcher").unwrap().wakeup();
        for name in ["top_a", "top_b"] {
            assert_eq!(
                fun.find_friend::<crate::tools::Stub>(name)
                    .unwrap()
                    .wakeup_called(),
                1
            );
        }
    }

    #[test]
    fn test_unresolved_provider() {
        let (_, context, _) = Executor::default();
        let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
        fun.add(Builder::new("a"), OpcodeSetter::new("dispatcher", 0))
            .unwrap();
        assert!(matches!(
            fun.on_fun_created(),
            Err(Error::UnknownFunctionalUnit { name, .. }) if name == "dispatcher"
        ));
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
name: station
units:
  - { name: a, plugin: opcode_setter, config: { provider: dispatcher, opcode: 0 } }
  - { name: dispatcher, plugin: dispatcher, config: { bits: 4 } }
  - { name: lower, plugin: stub }
links:
  - { upper: a, lower: dispatcher }
  - { upper: dispatcher, lower: lower }
"#;
        let (_, context, _) = Executor::default();
        let fun = Fun::from_config(
            context,
            Rc::new(CommandRegistry::default()),
            &Factory::default(),
            &View::parse(yaml).unwrap(),
        )
        .unwrap();
        fun.get("a").unwrap().send_data(fun.create_compound(None));
        let sent = fun
            .find_friend::<crate::tools::Stub>("lower")
            .unwrap()
            .sent();
        assert_eq!(sent[0].length_bits(), 4);
        assert_eq!(fun.find_friend::<OpcodeSetter>("a").unwrap().opcode(), 0);
    }
}
