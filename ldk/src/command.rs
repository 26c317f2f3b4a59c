//! Per-layer metadata attached to a compound.
//!
//! Each functional unit declares exactly one command type. A command is
//! split, by convention, into three regions kept as separate struct fields:
//!
//! - `local`: bookkeeping only the sending unit reads,
//! - `peer`: information conveyed to the peer unit (the only region that
//!   occupies bits on the wire, see [Command::peer_size]),
//! - `magic`: out-of-band simulation data (timestamps, debug ids) that is
//!   never counted.

use std::{any::Any, fmt};

/// Number of bits.
pub type Bits = u64;

/// Identifier of a command role, assigned by the command registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(u32);

impl CommandId {
    pub(crate) fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sizes of a compound as seen at some position of the stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sizes {
    /// Bits contributed by the peer regions of the commands above.
    pub command_pool: Bits,
    /// Bits of user data.
    pub data: Bits,
}

impl Sizes {
    pub fn new(command_pool: Bits, data: Bits) -> Self {
        Self { command_pool, data }
    }

    /// Total length on the wire.
    pub fn total(&self) -> Bits {
        self.command_pool + self.data
    }
}

/// Object-safe plumbing implemented for every `Command + Clone`.
pub trait CommandBase {
    fn clone_box(&self) -> Box<dyn Command>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Command + Clone> CommandBase for T {
    fn clone_box(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Metadata a functional unit attaches to a compound.
pub trait Command: CommandBase + fmt::Debug + 'static {
    /// Bits occupied by the `peer` region.
    fn peer_size(&self) -> Bits {
        0
    }

    /// Sizes seen below this command given the sizes seen above it.
    ///
    /// The default adds [Command::peer_size] to the command pool size. Units
    /// that reshape the payload (segmentation, concatenation, padding)
    /// override this.
    fn sizes(&self, above: Sizes) -> Sizes {
        Sizes {
            command_pool: above.command_pool + self.peer_size(),
            data: above.data,
        }
    }
}

/// Command of units that carry no metadata.
#[derive(Clone, Debug, Default)]
pub struct EmptyCommand;

impl Command for EmptyCommand {}
