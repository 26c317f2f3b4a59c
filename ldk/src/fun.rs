use crate::{
    metrics::Metrics, Builder, CommandReader, CommandRegistry, Compound, Error, Factory,
    FunctionalUnit, Handler,
};
use bytes::Bytes;
use std::{
    any::{type_name, Any},
    cell::{Cell, RefCell},
    collections::BTreeMap,
    rc::Rc,
};
use strata_runtime::{deterministic::Context, Metrics as _};
use strata_utils::config::View;
use tracing::{debug, info};

/// A functional unit network: the units of one protocol stack.
///
/// The FUN owns its units and resolves them by name. Units are added with
/// [Fun::add], wired with [Fun::connect], and once the graph is complete
/// [Fun::on_fun_created] lets every unit and link strategy resolve the
/// names it depends on.
pub struct Fun {
    name: String,
    context: Context,
    registry: Rc<CommandRegistry>,
    units: RefCell<BTreeMap<String, Rc<FunctionalUnit>>>,
    metrics: Metrics,
    journey: Rc<Cell<bool>>,
    created: Cell<bool>,
}

impl Fun {
    /// Create an empty FUN.
    ///
    /// Every FUN of a simulation must share `registry` for peers to read
    /// each other's commands.
    pub fn new(context: Context, registry: Rc<CommandRegistry>, name: &str) -> Self {
        let metrics = Metrics::init(context.with_label(name));
        Self {
            name: name.to_string(),
            context,
            registry,
            units: RefCell::new(BTreeMap::new()),
            metrics,
            journey: Rc::new(Cell::new(false)),
            created: Cell::new(false),
        }
    }

    /// Build a FUN from a view.
    ///
    /// ```yaml
    /// name: station
    /// journey: true
    /// units:
    ///   - name: buffer
    ///     plugin: bounded
    ///     role: buffer
    ///     connector: { type: round_robin }
    ///     config: { size: 10, unit: compounds }
    /// links:
    ///   - { upper: upper, lower: buffer }
    ///   - { upper: buffer, lower: lower, kind: down }
    /// ```
    ///
    /// Units are created by the plugin of the same name in `factory`, links
    /// are `both` (the default), `down` or `up`. [Fun::on_fun_created] is
    /// called before returning.
    pub fn from_config(
        context: Context,
        registry: Rc<CommandRegistry>,
        factory: &Factory,
        view: &View,
    ) -> Result<Self, Error> {
        let name: String = view.get("name")?;
        let fun = Self::new(context, registry, &name);
        fun.trace_journey(view.get_or("journey", false)?);
        if view.knows("units") {
            for unit in view.views("units")? {
                let name: String = unit.get("name")?;
                let plugin: String = unit.get("plugin")?;
                let builder = Builder::new(name).configure(&unit)?;
                let config = if unit.knows("config") {
                    unit.view("config")?
                } else {
                    View::empty()
                };
                factory.create(&plugin, &fun, builder, &config)?;
            }
        }
        if view.knows("links") {
            for link in view.views("links")? {
                let upper: String = link.get("upper")?;
                let lower: String = link.get("lower")?;
                match link.get_or("kind", "both".to_string())?.as_str() {
                    "both" => fun.connect(&upper, &lower)?,
                    "down" => fun.down_connect(&upper, &lower)?,
                    "up" => fun.up_connect(&upper, &lower)?,
                    other => return Err(Error::UnknownStrategy(other.to_string())),
                }
            }
        }
        fun.on_fun_created()?;
        info!(fun = %fun.name, units = fun.len(), "created fun");
        Ok(fun)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn registry(&self) -> &Rc<CommandRegistry> {
        &self.registry
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Record every unit a compound passes (see [Compound::journey]).
    pub fn trace_journey(&self, enabled: bool) {
        self.journey.set(enabled);
    }

    /// Add a unit built from `builder` and driven by `handler`.
    pub fn add<H: Handler>(&self, builder: Builder, handler: H) -> Result<Rc<FunctionalUnit>, Error> {
        if self.knows(builder.name()) {
            return Err(Error::DuplicateFunctionalUnit {
                fun: self.name.clone(),
                name: builder.name().to_string(),
            });
        }
        let (type_id, command) = builder.command_type();
        let id = self
            .registry
            .register_type(builder.role_name(), type_id, command)?;

        let handler = Rc::new(handler);
        let state: Rc<dyn Any> = handler.clone();
        let name = builder.name().to_string();
        let fu = builder.build(self, id, handler.clone(), state, self.journey.clone());
        handler.attach(Rc::downgrade(&fu));
        debug!(fun = %self.name, fu = %name, role = fu.role(), %id, "added unit");
        self.units.borrow_mut().insert(name, fu.clone());
        Ok(fu)
    }

    /// Remove a unit. Links of other units to it vanish once it is dropped.
    pub fn remove(&self, name: &str) -> Result<(), Error> {
        let removed = self.units.borrow_mut().remove(name);
        match removed {
            Some(_) => {
                debug!(fun = %self.name, fu = name, "removed unit");
                Ok(())
            }
            None => Err(self.unknown(name)),
        }
    }

    fn unknown(&self, name: &str) -> Error {
        Error::UnknownFunctionalUnit {
            fun: self.name.clone(),
            name: name.to_string(),
            available: self.names().join(", "),
        }
    }

    /// The unit called `name`.
    pub fn get(&self, name: &str) -> Result<Rc<FunctionalUnit>, Error> {
        self.units
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| self.unknown(name))
    }

    pub fn knows(&self, name: &str) -> bool {
        self.units.borrow().contains_key(name)
    }

    /// Names of every unit, sorted.
    pub fn names(&self) -> Vec<String> {
        self.units.borrow().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.units.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.borrow().is_empty()
    }

    /// The handler of the unit called `name`, as a `T`.
    pub fn find_friend<T: Handler>(&self, name: &str) -> Result<Rc<T>, Error> {
        self.get(name)?
            .handler::<T>()
            .ok_or_else(|| Error::FriendTypeMismatch {
                name: name.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Connect `upper` above `lower` in both directions.
    ///
    /// Nothing is registered unless every side accepts the link.
    pub fn connect(&self, upper: &str, lower: &str) -> Result<(), Error> {
        let (upper, lower) = (self.get(upper)?, self.get(lower)?);
        upper.connector().can_add(&lower)?;
        lower.receptor().can_add(&upper)?;
        lower.deliverer().can_add(&upper)?;
        upper.connector().add(&lower)?;
        lower.receptor().add(&upper)?;
        lower.deliverer().add(&upper)
    }

    /// Let `upper` send to `lower` (and `lower` wake up `upper`).
    ///
    /// Nothing is registered unless both sides accept the link.
    pub fn down_connect(&self, upper: &str, lower: &str) -> Result<(), Error> {
        let (upper, lower) = (self.get(upper)?, self.get(lower)?);
        upper.connector().can_add(&lower)?;
        lower.receptor().can_add(&upper)?;
        upper.connector().add(&lower)?;
        lower.receptor().add(&upper)
    }

    /// Let `lower` deliver to `upper`.
    pub fn up_connect(&self, upper: &str, lower: &str) -> Result<(), Error> {
        let (upper, lower) = (self.get(upper)?, self.get(lower)?);
        lower.deliverer().add(&upper)
    }

    /// Let every unit resolve its dependencies on other units.
    ///
    /// Only the first successful call has an effect.
    pub fn on_fun_created(&self) -> Result<(), Error> {
        if self.created.get() {
            return Ok(());
        }
        let units: Vec<_> = self.units.borrow().values().cloned().collect();
        for fu in units {
            fu.on_fun_created(self)?;
        }
        self.created.set(true);
        Ok(())
    }

    /// Create a compound with an empty command pool.
    pub fn create_compound(&self, payload: Option<Bytes>) -> Compound {
        Compound::new(payload)
    }

    /// Create a compound answering `original` on behalf of `questioner`.
    ///
    /// Every unit of this FUN whose command was activated on `original`
    /// before the questioner's fills its command of the reply, from the top
    /// down.
    pub fn create_reply(&self, original: &Compound, questioner: &FunctionalUnit) -> Result<Compound, Error> {
        let above: Vec<_> = {
            let pool = original.pool();
            let path: Vec<_> = pool.path().collect();
            let index = path
                .iter()
                .position(|id| *id == questioner.command_id())
                .ok_or(Error::NotInPath(questioner.command_id()))?;
            path[..index].to_vec()
        };

        let reply = self.create_compound(None);
        let units: Vec<_> = self.units.borrow().values().cloned().collect();
        for id in above {
            if let Some(fu) = units.iter().find(|fu| fu.command_id() == id) {
                fu.create_reply(original, &reply);
            }
        }
        Ok(reply)
    }

    /// Reader for the commands of `role`.
    pub fn command_reader(&self, role: &str) -> Result<CommandReader, Error> {
        self.registry.reader(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        tools::{Stub, StubCommand},
        Bits, Command,
    };
    use strata_runtime::deterministic::Executor;

    fn fun() -> Fun {
        let (_, context, _) = Executor::default();
        Fun::new(context, Rc::new(CommandRegistry::default()), "station")
    }

    #[test]
    fn test_get_unknown() {
        let fun = fun();
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        fun.add(Builder::new("lower"), Stub::default()).unwrap();
        let err = fun.get("middle").unwrap_err();
        assert_eq!(
            err.to_string(),
            "functional unit middle not found in station (available: lower, upper)"
        );
    }

    #[test]
    fn test_duplicate() {
        let fun = fun();
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        assert!(matches!(
            fun.add(Builder::new("upper"), Stub::default()),
            Err(Error::DuplicateFunctionalUnit { name, .. }) if name == "upper"
        ));
        assert_eq!(fun.len(), 1);
    }

    #[test]
    fn test_find_friend() {
        #[derive(Default)]
        struct Other;
        impl Handler for Other {}

        let fun = fun();
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        fun.add(Builder::new("other"), Other).unwrap();
        assert!(fun.find_friend::<Stub>("upper").is_ok());
        assert!(fun.find_friend::<Other>("other").is_ok());
        assert!(matches!(
            fun.find_friend::<Stub>("other"),
            Err(Error::FriendTypeMismatch { name, .. }) if name == "other"
        ));
        assert!(matches!(
            fun.find_friend::<Stub>("missing"),
            Err(Error::UnknownFunctionalUnit { .. })
        ));
    }

    #[test]
    fn test_remove() {
        let fun = fun();
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        fun.add(Builder::new("lower"), Stub::default()).unwrap();
        fun.connect("upper", "lower").unwrap();
        fun.remove("lower").unwrap();
        assert!(!fun.knows("lower"));
        assert_eq!(fun.get("upper").unwrap().connector().size(), 0);
        assert!(fun.remove("lower").is_err());
    }

    #[test]
    fn test_connect_is_all_or_nothing() {
        let fun = fun();
        for name in ["a", "b", "c"] {
            fun.add(Builder::new(name), Stub::default()).unwrap();
        }
        fun.add(
            Builder::new("lower").receptor(Box::<crate::link::receptor::Multi>::default()),
            Stub::default(),
        )
        .unwrap();
        fun.add(Builder::new("bottom"), Stub::default()).unwrap();
        fun.connect("a", "lower").unwrap();
        fun.down_connect("c", "bottom").unwrap();

        // The single deliverer of lower refuses b: b must not send to lower
        assert!(matches!(
            fun.connect("b", "lower"),
            Err(Error::TooManyLinks { fu, .. }) if fu == "b"
        ));
        let (b, lower) = (fun.get("b").unwrap(), fun.get("lower").unwrap());
        assert_eq!(b.connector().size(), 0);
        assert_eq!(lower.receptor().size(), 1);
        assert_eq!(lower.deliverer().get()[0].name(), "a");

        // The single receptor of bottom refuses b
        assert!(fun.down_connect("b", "bottom").is_err());
        assert_eq!(b.connector().size(), 0);
        assert_eq!(fun.get("bottom").unwrap().receptor().get()[0].name(), "c");

        // The single connector of a refuses a second lower neighbor
        assert!(fun.connect("a", "bottom").is_err());
        assert_eq!(fun.get("bottom").unwrap().receptor().size(), 1);
        assert_eq!(fun.get("bottom").unwrap().deliverer().size(), 0);
    }

    #[test]
    fn test_on_fun_created_once() {
        let fun = fun();
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        fun.on_fun_created().unwrap();
        fun.on_fun_created().unwrap();
        assert_eq!(fun.find_friend::<Stub>("upper").unwrap().fun_created(), 1);
    }

    #[test]
    fn test_shared_roles() {
        let registry = Rc::new(CommandRegistry::default());
        let (_, context, _) = Executor::default();
        let sender = Fun::new(context.clone(), registry.clone(), "sender");
        let receiver = Fun::new(context, registry.clone(), "receiver");
        let a = sender
            .add(Builder::new("mac").role("mac"), Stub::default())
            .unwrap();
        let b = receiver
            .add(Builder::new("mac").role("mac"), Stub::default())
            .unwrap();
        assert_eq!(a.command_id(), b.command_id());
        assert_eq!(sender.command_reader("mac").unwrap().id(), a.command_id());
        assert!(receiver.command_reader("phy").is_err());
    }

    #[derive(Clone, Debug, Default)]
    struct Ack {
        peer: AckPeer,
    }

    #[derive(Clone, Debug, Default)]
    struct AckPeer {
        acknowledged: bool,
    }

    impl Command for Ack {
        fn peer_size(&self) -> Bits {
            1
        }
    }

    struct Acknowledger;

    impl Handler for Acknowledger {
        fn create_reply(&self, fu: &FunctionalUnit, _original: &Compound, reply: &Compound) {
            fu.activate_command::<Ack>(reply).peer.acknowledged = true;
        }
    }

    #[test]
    fn test_create_reply() {
        let fun = fun();
        let upper = fun
            .add(Builder::new("upper").command::<Ack>(), Acknowledger)
            .unwrap();
        let lower = fun
            .add(Builder::new("lower").command::<StubCommand>(), Stub::default())
            .unwrap();
        fun.connect("upper", "lower").unwrap();

        let original = fun.create_compound(None);
        upper.activate_command::<Ack>(&original);
        lower.activate_command::<StubCommand>(&original);

        let reply = fun.create_reply(&original, &lower).unwrap();
        assert!(upper.get_command::<Ack>(&reply).peer.acknowledged);
        assert!(!lower.is_activated(&reply));

        // The questioner must be in the path
        let other = fun.create_compound(None);
        assert!(matches!(
            fun.create_reply(&other, &lower),
            Err(Error::NotInPath(_))
        ));
    }

    #[test]
    fn test_from_config() {
        let yaml = r#"
name: station
journey: true
units:
  - { name: upper, plugin: stub }
  - name: buffer
    plugin: bounded
    suspendable: true
    config: { size: 1, unit: compounds }
  - { name: lower, plugin: stub }
links:
  - { upper: upper, lower: buffer }
  - { upper: buffer, lower: lower }
"#;
        let (_, context, _) = Executor::default();
        let fun = Fun::from_config(
            context,
            Rc::new(CommandRegistry::default()),
            &Factory::default(),
            &View::parse(yaml).unwrap(),
        )
        .unwrap();
        assert_eq!(fun.names(), vec!["buffer", "lower", "upper"]);
        assert!(fun.get("buffer").unwrap().is_suspendable());
        assert_eq!(fun.find_friend::<Stub>("upper").unwrap().fun_created(), 1);

        fun.get("upper").unwrap().send_data(fun.create_compound(None));
        let sent = fun.find_friend::<Stub>("lower").unwrap().sent();
        assert_eq!(sent[0].journey().len(), 3);
    }

    #[test]
    fn test_from_config_errors() {
        let (_, context, _) = Executor::default();
        let registry = Rc::new(CommandRegistry::default());
        let factory = Factory::default();

        let view = View::parse("{name: station, units: [{name: a, plugin: missing}]}").unwrap();
        assert!(matches!(
            Fun::from_config(context.clone(), registry.clone(), &factory, &view),
            Err(Error::UnknownPlugin(name)) if name == "missing"
        ));

        let view = View::parse("{name: station, links: [{upper: a, lower: b}]}").unwrap();
        assert!(matches!(
            Fun::from_config(context.clone(), registry.clone(), &factory, &view),
            Err(Error::UnknownFunctionalUnit { .. })
        ));

        let view = View::parse("units: []").unwrap();
        assert!(matches!(
            Fun::from_config(context, registry, &factory, &view),
            Err(Error::Config(_))
        ));
    }
}
