use crate::{
    buffer::{Bounded, Dropping},
    delayed::Delayed,
    multiplexer::{Dispatcher, OpcodeSetter},
    probe::{Packet, PacketCommand},
    tools::{Stub, StubCommand},
    Builder, Error, Fun, FunctionalUnit,
};
use std::{collections::BTreeMap, rc::Rc};
use strata_utils::config::View;

type Plugin = Box<dyn Fn(&Fun, Builder, &View) -> Result<Rc<FunctionalUnit>, Error>>;

/// Named constructors of units, used to build a [Fun] from a configuration.
///
/// A plugin receives the FUN, a [Builder] already configured with the unit's
/// name, role, link strategies and suspendability, and the unit's own
/// `config` view. It declares the unit's command and adds the unit.
pub struct Factory {
    plugins: BTreeMap<String, Plugin>,
}

impl Factory {
    /// A factory without any plugin.
    pub fn empty() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Register (or replace) the plugin called `name`.
    pub fn register<F>(&mut self, name: &str, plugin: F)
    where
        F: Fn(&Fun, Builder, &View) -> Result<Rc<FunctionalUnit>, Error> + 'static,
    {
        self.plugins.insert(name.to_string(), Box::new(plugin));
    }

    pub fn knows(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    /// Create a unit with the plugin called `name`.
    pub fn create(
        &self,
        name: &str,
        fun: &Fun,
        builder: Builder,
        config: &View,
    ) -> Result<Rc<FunctionalUnit>, Error> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| Error::UnknownPlugin(name.to_string()))?;
        plugin(fun, builder, config)
    }
}

impl Default for Factory {
    /// A factory with the units shipped with this crate: `stub`, `bounded`,
    /// `dropping`, `packet_probe`, `opcode_setter` and `dispatcher`.
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register("stub", |fun, builder, config| {
            fun.add(builder.command::<StubCommand>(), Stub::from_config(config)?)
        });
        factory.register("bounded", |fun, builder, config| {
            fun.add(builder, Delayed::new(Bounded::from_config(config)?))
        });
        factory.register("dropping", |fun, builder, config| {
            fun.add(builder, Delayed::new(Dropping::from_config(config)?))
        });
        factory.register("packet_probe", |fun, builder, _| {
            let packet = Packet::histograms(fun, builder.name());
            fun.add(builder.command::<PacketCommand>(), packet)
        });
        factory.register("opcode_setter", |fun, builder, config| {
            fun.add(builder, OpcodeSetter::from_config(config)?)
        });
        factory.register("dispatcher", |fun, builder, config| {
            let bits = config.get_or("bits", 8)?;
            fun.add(Dispatcher::configure(builder, bits), Dispatcher::default())
        });
        factory
    }
}
