//! Compose layered protocol stacks from reusable functional units.
//!
//! A stack (a [Fun], "functional unit network") is a directed graph of
//! [FunctionalUnit]s. Outgoing data travels down the graph as a [Compound]:
//! every unit it passes may attach a [Command] to the compound's
//! [CommandPool], and the unit's peer in the receiving stack reads it back on
//! the way up. Units never reference their neighbors directly; each one holds
//! three pluggable link strategies:
//!
//! - a [link::Connector] selecting the lower unit to send to (with
//!   backpressure through `is_accepting`),
//! - a [link::Deliverer] selecting the upper unit to deliver to,
//! - a [link::Receptor] fanning out wakeups to the upper units once capacity
//!   frees up.
//!
//! All activity is driven by the single-threaded scheduler of
//! `strata-runtime`: an event fires, a unit's entry point runs synchronously
//! through the stack, and units schedule further events for timers.
//!
//! # Example
//!
//! ```rust
//! use strata_ldk::{tools::Stub, Builder, CommandRegistry, Fun};
//! use strata_runtime::deterministic::Executor;
//! use std::rc::Rc;
//!
//! let (_, context, _) = Executor::default();
//! let fun = Fun::new(context, Rc::new(CommandRegistry::default()), "station");
//! fun.add(Builder::new("upper"), Stub::default()).unwrap();
//! fun.add(Builder::new("lower"), Stub::default()).unwrap();
//! fun.connect("upper", "lower").unwrap();
//! fun.on_fun_created().unwrap();
//!
//! let upper = fun.get("upper").unwrap();
//! let compound = fun.create_compound(None);
//! assert!(upper.is_accepting(&compound));
//! upper.send_data(compound);
//! assert_eq!(fun.find_friend::<Stub>("lower").unwrap().sent().len(), 1);
//! ```
//!
//! # Status
//!
//! `strata-ldk` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use thiserror::Error;

pub mod buffer;
mod command;
pub use command::{Bits, Command, CommandBase, CommandId, EmptyCommand, Sizes};
mod compound;
pub use compound::{Compound, Visit};
pub mod delayed;
mod factory;
pub use factory::Factory;
mod fu;
pub use fu::{Builder, FunctionalUnit, Handler};
mod fun;
pub use fun::Fun;
pub mod link;
mod metrics;
pub mod multiplexer;
mod pool;
pub use pool::CommandPool;
pub mod probe;
mod registry;
pub use registry::{CommandReader, CommandRegistry};
pub mod suspend;
pub mod tools;

/// Errors that can occur when building or querying a stack.
#[derive(Error, Debug)]
pub enum Error {
    #[error("command not activated: {0}")]
    CommandNotActivated(CommandId),
    #[error("command {id} is not a {expected}")]
    CommandTypeMismatch {
        id: CommandId,
        expected: &'static str,
    },
    #[error("command {0} is not in the path of the compound")]
    NotInPath(CommandId),
    #[error("role {role} is registered for {existing}, not {requested}")]
    RoleTypeMismatch {
        role: String,
        existing: &'static str,
        requested: &'static str,
    },
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("functional unit {name} not found in {fun} (available: {available})")]
    UnknownFunctionalUnit {
        fun: String,
        name: String,
        available: String,
    },
    #[error("functional unit {name} already exists in {fun}")]
    DuplicateFunctionalUnit { fun: String, name: String },
    #[error("friend {name} is not a {expected}")]
    FriendTypeMismatch {
        name: String,
        expected: &'static str,
    },
    #[error("provider {provider} does not declare {expected}")]
    ProviderCommand {
        provider: String,
        expected: &'static str,
    },
    #[error("{strategy} already has a neighbor, cannot add {fu}")]
    TooManyLinks { strategy: &'static str, fu: String },
    #[error("unknown link strategy: {0}")]
    UnknownStrategy(String),
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] strata_utils::config::Error),
}
