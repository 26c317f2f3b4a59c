use crate::{Bits, Command, CommandId, Error, Sizes};
use std::{any::type_name, fmt};

struct Entry {
    id: CommandId,
    command: Box<dyn Command>,
    committed: Option<Sizes>,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            command: self.command.clone_box(),
            committed: self.committed,
        }
    }
}

/// Ordered collection of the commands activated on a compound.
///
/// Insertion order is the order in which units activated their commands,
/// which is the order of traversal down the stack. Each [CommandId] occurs at
/// most once.
#[derive(Clone, Default)]
pub struct CommandPool {
    entries: Vec<Entry>,
    data: Bits,
}

impl CommandPool {
    /// Create an empty pool for a payload of `data` bits.
    pub fn new(data: Bits) -> Self {
        Self {
            entries: Vec::new(),
            data,
        }
    }

    /// Bits of user data carried by the compound.
    pub fn data_bits(&self) -> Bits {
        self.data
    }

    fn position(&self, id: CommandId) -> Option<usize> {
        self.entries.iter().position(|entry| entry.id == id)
    }

    /// Return the command stored under `id`, creating it with `create` if it
    /// was never activated.
    pub fn activate(
        &mut self,
        id: CommandId,
        create: impl FnOnce() -> Box<dyn Command>,
    ) -> &mut dyn Command {
        let index = match self.position(id) {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    id,
                    command: create(),
                    committed: None,
                });
                self.entries.len() - 1
            }
        };
        self.entries[index].command.as_mut()
    }

    /// Returns whether `id` was activated.
    pub fn knows(&self, id: CommandId) -> bool {
        self.position(id).is_some()
    }

    pub fn get(&self, id: CommandId) -> Result<&dyn Command, Error> {
        let index = self.position(id).ok_or(Error::CommandNotActivated(id))?;
        Ok(self.entries[index].command.as_ref())
    }

    pub fn get_mut(&mut self, id: CommandId) -> Result<&mut dyn Command, Error> {
        let index = self.position(id).ok_or(Error::CommandNotActivated(id))?;
        Ok(self.entries[index].command.as_mut())
    }

    /// Return the command stored under `id` as a `C`.
    pub fn get_as<C: Command>(&self, id: CommandId) -> Result<&C, Error> {
        self.get(id)?
            .as_any()
            .downcast_ref::<C>()
            .ok_or(Error::CommandTypeMismatch {
                id,
                expected: type_name::<C>(),
            })
    }

    pub fn get_as_mut<C: Command>(&mut self, id: CommandId) -> Result<&mut C, Error> {
        self.get_mut(id)?
            .as_any_mut()
            .downcast_mut::<C>()
            .ok_or(Error::CommandTypeMismatch {
                id,
                expected: type_name::<C>(),
            })
    }

    /// Activated commands in activation order.
    pub fn path(&self) -> impl Iterator<Item = CommandId> + '_ {
        self.entries.iter().map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sizes as seen by the unit owning `stop_at`: every command activated
    /// before it is accounted for, its own and later ones are not. Without
    /// `stop_at`, every command is accounted for.
    pub fn calculate_sizes(&self, stop_at: Option<CommandId>) -> Result<Sizes, Error> {
        let end = match stop_at {
            Some(id) => self.position(id).ok_or(Error::NotInPath(id))?,
            None => self.entries.len(),
        };
        Ok(self.accumulate(end))
    }

    /// Sizes below the command at `id` (including it).
    pub fn sizes_below(&self, id: CommandId) -> Result<Sizes, Error> {
        let index = self.position(id).ok_or(Error::NotInPath(id))?;
        Ok(self.accumulate(index + 1))
    }

    /// Freeze the sizes below `id` (and below every command above it).
    ///
    /// Later walks resume from the frozen value instead of recomputing the
    /// commands above, so changes to those commands no longer affect the
    /// size.
    pub fn commit_sizes(&mut self, id: CommandId) -> Result<Sizes, Error> {
        let index = self.position(id).ok_or(Error::NotInPath(id))?;
        for i in 0..=index {
            if self.entries[i].committed.is_none() {
                let sizes = self.accumulate(i + 1);
                self.entries[i].committed = Some(sizes);
            }
        }
        Ok(self.accumulate(index + 1))
    }

    fn accumulate(&self, end: usize) -> Sizes {
        // Resume from the closest committed command above `end`
        let (start, mut sizes) = self.entries[..end]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, entry)| entry.committed.map(|sizes| (index + 1, sizes)))
            .unwrap_or((0, Sizes::new(0, self.data)));
        for entry in &self.entries[start..end] {
            sizes = entry.command.sizes(sizes);
        }
        sizes
    }

    /// Copy the commands activated up to and including `initiator`.
    pub fn partial_copy(&self, initiator: CommandId) -> Result<CommandPool, Error> {
        let index = self.position(initiator).ok_or(Error::NotInPath(initiator))?;
        Ok(Self {
            entries: self.entries[..=index].to_vec(),
            data: self.data,
        })
    }

    /// Render every command for diagnostics.
    pub fn dump(&self) -> String {
        let mut dump = format!("command pool ({} bits of data):", self.data);
        for entry in &self.entries {
            dump.push_str(&format!("\n  {}: {:?}", entry.id, entry.command));
        }
        dump
    }
}

impl fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|entry| (entry.id, &entry.command)))
            .finish()
    }
}
