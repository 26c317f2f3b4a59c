use crate::{
    link::{self, Connector, Deliverer, Receptor},
    metrics::Counters,
    probe::Probe,
    suspend::{State, SuspendSupport, SuspendedCallback},
    Command, CommandId, Compound, EmptyCommand, Error, Fun, Sizes,
};
use std::{
    any::{type_name, Any, TypeId},
    cell::{Cell, Ref, RefMut},
    fmt,
    rc::{Rc, Weak},
};
use strata_runtime::{deterministic::Context, Clock};
use strata_utils::config::View;
use tracing::{debug, trace};

/// Behaviour of a functional unit.
///
/// Every method receives the unit it is attached to. The defaults make a
/// transparent unit: compounds are forwarded through the unit's link
/// strategies untouched.
pub trait Handler: Any {
    /// Returns whether the unit can take `compound` now.
    fn is_accepting(&self, fu: &FunctionalUnit, compound: &Compound) -> bool {
        fu.connector().has_acceptor(compound)
    }

    /// Process an outgoing compound. Only called after
    /// [Handler::is_accepting] returned true.
    fn send_data(&self, fu: &FunctionalUnit, compound: Compound) {
        fu.connector().send_data(compound);
    }

    /// Process an incoming compound.
    fn on_data(&self, fu: &FunctionalUnit, compound: Compound) {
        fu.deliverer().on_data(compound);
    }

    /// Capacity became available below the unit.
    fn wakeup(&self, fu: &FunctionalUnit) {
        fu.receptor().wakeup();
    }

    /// Called once when the unit is created, with a handle the handler may
    /// keep to reach the unit from scheduled events.
    fn attach(&self, _fu: Weak<FunctionalUnit>) {}

    /// Called once every unit of `fun` exists and is connected.
    fn on_fun_created(&self, _fu: &FunctionalUnit, _fun: &Fun) -> Result<(), Error> {
        Ok(())
    }

    /// Returns whether a requested suspension may take effect now.
    fn on_suspend(&self, _fu: &FunctionalUnit) -> bool {
        true
    }

    /// Fill the unit's command of `reply`, a compound answering `original`.
    fn create_reply(&self, _fu: &FunctionalUnit, _original: &Compound, _reply: &Compound) {}
}

/// How a unit creates its command.
#[derive(Clone)]
struct Blueprint {
    type_id: TypeId,
    type_name: &'static str,
    create: Rc<dyn Fn() -> Box<dyn Command>>,
}

impl Blueprint {
    fn of<C: Command>(create: impl Fn() -> C + 'static) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: type_name::<C>(),
            create: Rc::new(move || Box::new(create())),
        }
    }
}

/// Description of a unit to be added to a [Fun].
pub struct Builder {
    name: String,
    role: Option<String>,
    command: Blueprint,
    connector: Box<dyn Connector>,
    receptor: Box<dyn Receptor>,
    deliverer: Box<dyn Deliverer>,
    suspendable: bool,
    suspend_probe: Option<Rc<dyn Probe>>,
}

impl Builder {
    /// A transparent unit with an [EmptyCommand] and single links.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: None,
            command: Blueprint::of(EmptyCommand::default),
            connector: Box::<link::connector::Single>::default(),
            receptor: Box::<link::receptor::Single>::default(),
            deliverer: Box::<link::deliverer::Single>::default(),
            suspendable: false,
            suspend_probe: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role under which the command is registered (defaults to the name).
    ///
    /// Units exchanging commands across stations must share the role.
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Declare the command of the unit.
    pub fn command<C: Command + Default>(self) -> Self {
        self.command_with(C::default)
    }

    /// Declare the command of the unit with a custom constructor.
    pub fn command_with<C: Command>(mut self, create: impl Fn() -> C + 'static) -> Self {
        self.command = Blueprint::of(create);
        self
    }

    pub fn connector(mut self, connector: Box<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn receptor(mut self, receptor: Box<dyn Receptor>) -> Self {
        self.receptor = receptor;
        self
    }

    pub fn deliverer(mut self, deliverer: Box<dyn Deliverer>) -> Self {
        self.deliverer = deliverer;
        self
    }

    /// Allow the unit to be suspended.
    pub fn suspendable(mut self) -> Self {
        self.suspendable = true;
        self
    }

    /// Allow the unit to be suspended and record transitions in `probe`.
    pub fn suspend_probe(mut self, probe: Rc<dyn Probe>) -> Self {
        self.suspendable = true;
        self.suspend_probe = Some(probe);
        self
    }

    /// Apply the `role`, `connector`, `receptor`, `deliverer` and
    /// `suspendable` keys of `view`.
    pub fn configure(mut self, view: &View) -> Result<Self, Error> {
        if view.knows("role") {
            self.role = Some(view.get("role")?);
        }
        if view.knows("connector") {
            self.connector = link::connector_from(&view.view("connector")?)?;
        }
        if view.knows("receptor") {
            self.receptor = link::receptor_from(&view.view("receptor")?)?;
        }
        if view.knows("deliverer") {
            self.deliverer = link::deliverer_from(&view.view("deliverer")?)?;
        }
        if view.get_or("suspendable", false)? {
            self.suspendable = true;
        }
        Ok(self)
    }

    pub(crate) fn role_name(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn command_type(&self) -> (TypeId, &'static str) {
        (self.command.type_id, self.command.type_name)
    }

    pub(crate) fn build(
        self,
        fun: &Fun,
        id: CommandId,
        handler: Rc<dyn Handler>,
        state: Rc<dyn Any>,
        journey: Rc<Cell<bool>>,
    ) -> Rc<FunctionalUnit> {
        let role = self.role_name().to_string();
        let counters = fun.metrics().unit(&self.name);
        let suspend = self
            .suspendable
            .then(|| SuspendSupport::new(self.suspend_probe));
        Rc::new_cyclic(|this| FunctionalUnit {
            name: self.name,
            fun: fun.name().to_string(),
            this: this.clone(),
            context: fun.context().clone(),
            id,
            role,
            command: self.command,
            connector: self.connector,
            receptor: self.receptor,
            deliverer: self.deliverer,
            suspend,
            handler,
            state,
            counters,
            journey,
        })
    }
}

/// A node of a [Fun].
///
/// A unit couples a [Handler] with its command declaration and its three
/// link strategies. Other units only ever talk to it through the entry
/// points [FunctionalUnit::is_accepting], [FunctionalUnit::send_data],
/// [FunctionalUnit::on_data] and [FunctionalUnit::wakeup].
pub struct FunctionalUnit {
    name: String,
    fun: String,
    this: Weak<FunctionalUnit>,
    context: Context,

    id: CommandId,
    role: String,
    command: Blueprint,

    connector: Box<dyn Connector>,
    receptor: Box<dyn Receptor>,
    deliverer: Box<dyn Deliverer>,
    suspend: Option<SuspendSupport>,

    handler: Rc<dyn Handler>,
    state: Rc<dyn Any>,
    counters: Counters,
    journey: Rc<Cell<bool>>,
}

impl FunctionalUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the FUN the unit belongs to.
    pub fn fun_name(&self) -> &str {
        &self.fun
    }

    /// Weak handle to the unit itself.
    pub fn this(&self) -> Weak<FunctionalUnit> {
        self.this.clone()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn command_id(&self) -> CommandId {
        self.id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Type of the declared command.
    pub fn command_type(&self) -> TypeId {
        self.command.type_id
    }

    pub fn command_type_name(&self) -> &'static str {
        self.command.type_name
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }

    pub fn receptor(&self) -> &dyn Receptor {
        self.receptor.as_ref()
    }

    pub fn deliverer(&self) -> &dyn Deliverer {
        self.deliverer.as_ref()
    }

    /// The handler, if it is an `H`.
    pub fn handler<H: Handler>(&self) -> Option<Rc<H>> {
        self.state.clone().downcast::<H>().ok()
    }

    fn location(&self) -> String {
        format!("{}.{}", self.fun, self.name)
    }

    /// Same as [FunctionalUnit::is_accepting], without counting a refusal.
    pub(crate) fn accepting(&self, compound: &Compound) -> bool {
        if self.suspend_state() == Some(State::Suspended) {
            return false;
        }
        self.handler.is_accepting(self, compound)
    }

    /// Returns whether the unit can take `compound` now.
    ///
    /// Every negative answer counts once in the `refused` metric.
    pub fn is_accepting(&self, compound: &Compound) -> bool {
        let accepting = self.accepting(compound);
        if !accepting {
            self.counters.refused.inc();
        }
        accepting
    }

    /// Hand an outgoing compound to the unit.
    ///
    /// # Panics
    ///
    /// Panics if the unit does not accept `compound`.
    pub fn send_data(&self, compound: Compound) {
        assert!(
            self.accepting(&compound),
            "{}: send_data called although the unit is not accepting",
            self.name
        );
        self.counters.sent.inc();
        if self.journey.get() {
            compound.visit(self.context.current(), self.location());
        }
        trace!(fu = %self.location(), length = compound.length_bits(), "send_data");
        self.handler.send_data(self, compound);
    }

    /// Hand an incoming compound to the unit.
    pub fn on_data(&self, compound: Compound) {
        self.counters.received.inc();
        if self.journey.get() {
            compound.visit(self.context.current(), self.location());
        }
        trace!(fu = %self.location(), length = compound.length_bits(), "on_data");
        self.handler.on_data(self, compound);
    }

    /// Signal that capacity became available below the unit.
    pub fn wakeup(&self) {
        self.counters.wakeups.inc();
        trace!(fu = %self.location(), "wakeup");
        self.handler.wakeup(self);
    }

    pub(crate) fn on_fun_created(&self, fun: &Fun) -> Result<(), Error> {
        self.connector.on_fun_created(self, fun)?;
        self.receptor.on_fun_created(self, fun)?;
        self.deliverer.on_fun_created(self, fun)?;
        self.handler.on_fun_created(self, fun)
    }

    pub(crate) fn create_reply(&self, original: &Compound, reply: &Compound) {
        self.handler.create_reply(self, original, reply);
    }

    fn check_type<C: Command>(&self) {
        assert!(
            TypeId::of::<C>() == self.command.type_id,
            "{}: requested command {} but the unit declares {}",
            self.name,
            type_name::<C>(),
            self.command.type_name
        );
    }

    /// The unit's command on `compound`, created if it was never activated.
    ///
    /// # Panics
    ///
    /// Panics if `C` is not the declared command type.
    pub fn activate_command<'a, C: Command>(&self, compound: &'a Compound) -> RefMut<'a, C> {
        self.check_type::<C>();
        {
            let create = &self.command.create;
            compound.pool_mut().activate(self.id, || create());
        }
        compound
            .command_mut::<C>(self.id)
            .unwrap_or_else(|err| panic!("{}: {err}", self.name))
    }

    /// Returns whether the unit's command was activated on `compound`.
    pub fn is_activated(&self, compound: &Compound) -> bool {
        compound.knows(self.id)
    }

    /// The unit's command on `compound` (activated by this unit or its
    /// peer).
    ///
    /// # Panics
    ///
    /// Panics (dumping the pool) if the command was never activated.
    pub fn get_command<'a, C: Command>(&self, compound: &'a Compound) -> Ref<'a, C> {
        match compound.command::<C>(self.id) {
            Ok(command) => command,
            Err(err) => panic!("{}: {err}\n{}", self.name, compound.pool().dump()),
        }
    }

    /// The unit's command on `compound`, or why it cannot be read.
    pub fn try_get_command<'a, C: Command>(&self, compound: &'a Compound) -> Result<Ref<'a, C>, Error> {
        compound.command::<C>(self.id)
    }

    /// Mutable access to the unit's command on `compound`.
    ///
    /// # Panics
    ///
    /// Panics (dumping the pool) if the command was never activated.
    pub fn get_command_mut<'a, C: Command>(&self, compound: &'a Compound) -> RefMut<'a, C> {
        if let Err(err) = compound.pool().get_as::<C>(self.id) {
            panic!("{}: {err}\n{}", self.name, compound.pool().dump());
        }
        compound
            .command_mut::<C>(self.id)
            .unwrap_or_else(|err| panic!("{}: {err}", self.name))
    }

    /// Sizes of `compound` below this unit (its own command included).
    pub fn sizes(&self, compound: &Compound) -> Result<Sizes, Error> {
        compound.pool().sizes_below(self.id)
    }

    /// Freeze the sizes of `compound` below this unit.
    pub fn commit_sizes(&self, compound: &Compound) -> Result<Sizes, Error> {
        compound.pool_mut().commit_sizes(self.id)
    }

    pub fn is_suspendable(&self) -> bool {
        self.suspend.is_some()
    }

    /// Position of the suspension gate (`None` if the unit is not
    /// suspendable).
    pub fn suspend_state(&self) -> Option<State> {
        self.suspend.as_ref().map(SuspendSupport::state)
    }

    /// Request suspension; `controller` is notified once it takes effect.
    ///
    /// # Panics
    ///
    /// Panics if the unit is not suspendable or is not open.
    pub fn suspend(&self, controller: Rc<dyn SuspendedCallback>) {
        let Some(support) = &self.suspend else {
            panic!("{} does not support suspension", self.name);
        };
        support.request(&self.name, controller);
        debug!(fu = %self.location(), "suspension requested");
        self.try_suspend();
    }

    /// Complete a requested suspension if the handler agrees.
    ///
    /// Returns whether the unit became suspended.
    pub fn try_suspend(&self) -> bool {
        let Some(support) = &self.suspend else {
            return false;
        };
        if support.state() != State::Suspending || !self.handler.on_suspend(self) {
            return false;
        }
        let controller = support.complete(&self.name);
        self.counters.suspended.inc();
        debug!(fu = %self.location(), "suspended");
        if let Some(controller) = controller {
            controller.on_suspended(self);
        }
        true
    }

    /// Reopen the unit and wake up the units above.
    ///
    /// # Panics
    ///
    /// Panics if the unit is not suspendable.
    pub fn resume(&self) {
        let Some(support) = &self.suspend else {
            panic!("{} does not support suspension", self.name);
        };
        support.reopen(&self.name);
        debug!(fu = %self.location(), "resumed");
        self.receptor.wakeup();
    }
}

impl fmt::Debug for FunctionalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionalUnit")
            .field("fun", &self.fun)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("command", &self.command.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{tools::Stub, Bits, CommandRegistry};
    use strata_macros::test_traced;
    use strata_runtime::{deterministic::Executor, Metrics as _};

    #[derive(Clone, Debug, Default)]
    struct Header {
        peer: HeaderPeer,
    }

    #[derive(Clone, Debug, Default)]
    struct HeaderPeer {
        sequence: u32,
    }

    impl Command for Header {
        fn peer_size(&self) -> Bits {
            32
        }
    }

    /// Stamps a sequence number on every outgoing compound.
    #[derive(Default)]
    struct Sequencer {
        next: Cell<u32>,
    }

    impl Handler for Sequencer {
        fn send_data(&self, fu: &FunctionalUnit, compound: Compound) {
            let sequence = self.next.get();
            self.next.set(sequence + 1);
            fu.activate_command::<Header>(&compound).peer.sequence = sequence;
            fu.connector().send_data(compound);
        }
    }

    /// Unit without state of its own, relying on the default behaviour.
    struct Forward;

    impl Handler for Forward {}

    fn chain() -> Fun {
        let (_, context, _) = Executor::default();
        let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        fun.add(Builder::new("sequencer").command::<Header>(), Sequencer::default())
            .unwrap();
        fun.add(Builder::new("lower"), Stub::default()).unwrap();
        fun.connect("upper", "sequencer").unwrap();
        fun.connect("sequencer", "lower").unwrap();
        fun.on_fun_created().unwrap();
        fun
    }

    #[test_traced]
    fn test_three_unit_chain() {
        let fun = chain();
        let upper = fun.get("upper").unwrap();
        let sequencer = fun.get("sequencer").unwrap();
        for _ in 0..3 {
            upper.send_data(fun.create_compound(None));
        }

        // Each compound was stamped in order
        let sent = fun.find_friend::<Stub>("lower").unwrap().sent();
        assert_eq!(sent.len(), 3);
        for (i, compound) in sent.iter().enumerate() {
            assert_eq!(sequencer.get_command::<Header>(compound).peer.sequence, i as u32);
            assert_eq!(sequencer.sizes(compound).unwrap().command_pool, 32);
        }

        // Delivered back up through every unit
        let lower = fun.get("lower").unwrap();
        lower.on_data(sent[0].clone());
        assert_eq!(fun.find_friend::<Stub>("upper").unwrap().received().len(), 1);
    }

    #[test_traced]
    fn test_wakeup_through_transparent_unit() {
        let (_, context, _) = Executor::default();
        let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
        fun.add(Builder::new("upper"), Stub::default()).unwrap();
        fun.add(Builder::new("middle"), Forward).unwrap();
        fun.add(Builder::new("lower"), Stub::default()).unwrap();
        fun.connect("upper", "middle").unwrap();
        fun.connect("middle", "lower").unwrap();
        fun.on_fun_created().unwrap();

        fun.get("lower").unwrap().receptor().wakeup();
        let upper = fun.find_friend::<Stub>("upper").unwrap();
        assert_eq!(upper.wakeup_called(), 1);
        assert!(upper.sent().is_empty());
        assert!(fun.find_friend::<Forward>("middle").is_ok());
        let encoded = fun.context().encode();
        assert!(encoded.contains("station_wakeups_total{fu=\"middle\"} 1"));
        assert!(encoded.contains("station_wakeups_total{fu=\"lower\"} 0"));

        // The middle unit still forwards both ways
        fun.get("upper").unwrap().send_data(fun.create_compound(None));
        let sent = fun.find_friend::<Stub>("lower").unwrap().sent();
        assert_eq!(sent.len(), 1);
        fun.get("lower").unwrap().on_data(sent[0].clone());
        assert_eq!(upper.received().len(), 1);
    }

    #[test]
    fn test_get_after_copy() {
        let fun = chain();
        let sequencer = fun.get("sequencer").unwrap();
        let compound = fun.create_compound(None);
        sequencer.activate_command::<Header>(&compound).peer.sequence = 7;
        let copy = compound.copy();
        sequencer.get_command_mut::<Header>(&copy).peer.sequence = 8;
        assert_eq!(sequencer.get_command::<Header>(&compound).peer.sequence, 7);
        assert_eq!(sequencer.get_command::<Header>(&copy).peer.sequence, 8);

        // Activation is idempotent
        assert_eq!(sequencer.activate_command::<Header>(&compound).peer.sequence, 7);
        assert!(sequencer.is_activated(&compound));
    }

    #[test]
    fn test_try_get_command() {
        let fun = chain();
        let sequencer = fun.get("sequencer").unwrap();
        let compound = fun.create_compound(None);
        assert!(matches!(
            sequencer.try_get_command::<Header>(&compound),
            Err(Error::CommandNotActivated(_))
        ));
        assert!(matches!(sequencer.sizes(&compound), Err(Error::NotInPath(_))));
    }

    #[test]
    #[should_panic(expected = "command not activated")]
    fn test_get_command_not_activated() {
        let fun = chain();
        let sequencer = fun.get("sequencer").unwrap();
        sequencer.get_command::<Header>(&fun.create_compound(None));
    }

    #[test]
    #[should_panic(expected = "sequencer: requested command")]
    fn test_activate_wrong_type() {
        let fun = chain();
        let sequencer = fun.get("sequencer").unwrap();
        sequencer.activate_command::<EmptyCommand>(&fun.create_compound(None));
    }

    #[test]
    #[should_panic(expected = "upper: send_data called although the unit is not accepting")]
    fn test_send_without_acceptance() {
        let fun = chain();
        fun.find_friend::<Stub>("lower").unwrap().close();
        let upper = fun.get("upper").unwrap();
        let compound = fun.create_compound(None);
        assert!(!upper.is_accepting(&compound));
        upper.send_data(compound);
    }

    #[test]
    fn test_journey() {
        let fun = chain();
        fun.trace_journey(true);
        fun.get("upper").unwrap().send_data(fun.create_compound(None));
        let sent = fun.find_friend::<Stub>("lower").unwrap().sent();
        let journey: Vec<_> = sent[0]
            .journey()
            .into_iter()
            .map(|visit| visit.location)
            .collect();
        assert_eq!(
            journey,
            vec!["station.upper", "station.sequencer", "station.lower"]
        );
    }

    #[test]
    fn test_metrics() {
        let fun = chain();
        fun.get("upper").unwrap().send_data(fun.create_compound(None));
        let encoded = fun.context().encode();
        assert!(encoded.contains("station_sent_total{fu=\"sequencer\"} 1"));
    }

    #[test]
    fn test_accessors() {
        let fun = chain();
        let sequencer = fun.get("sequencer").unwrap();
        assert_eq!(sequencer.name(), "sequencer");
        assert_eq!(sequencer.fun_name(), "station");
        assert_eq!(sequencer.role(), "sequencer");
        assert_eq!(sequencer.command_type(), TypeId::of::<Header>());
        assert!(sequencer.handler::<Sequencer>().is_some());
        assert!(sequencer.handler::<Stub>().is_none());
        assert!(Rc::ptr_eq(&sequencer.this().upgrade().unwrap(), &sequencer));
        assert!(format!("{sequencer:?}").contains("Header"));
    }

    #[test]
    fn test_configure() {
        let view = View::parse(
            "{role: mac, connector: {type: round_robin}, receptor: {type: multi}, suspendable: true}",
        )
        .unwrap();
        let builder = Builder::new("buffer").configure(&view).unwrap();
        assert_eq!(builder.role_name(), "mac");
        assert!(builder.suspendable);

        let view = View::parse("connector: {type: bogus}").unwrap();
        assert!(matches!(
            Builder::new("buffer").configure(&view),
            Err(Error::UnknownStrategy(name)) if name == "bogus"
        ));
    }
}
