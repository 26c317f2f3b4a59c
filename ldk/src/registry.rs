use crate::{Command, CommandId, Compound, Error};
use std::{
    any::{type_name, TypeId},
    cell::{Ref, RefCell},
    collections::BTreeMap,
};

#[derive(Clone, Debug)]
struct Role {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
}

/// Assigns a [CommandId] to every command role.
///
/// Peers (units in different FUNs playing the same role) must agree on the
/// identifier to read each other's commands, so a single registry is shared
/// by every FUN of a simulation.
#[derive(Default)]
pub struct CommandRegistry {
    ids: RefCell<BTreeMap<String, CommandId>>,
    roles: RefCell<Vec<Role>>,
}

impl CommandRegistry {
    /// Return the identifier of `role`, registering it for `C` if unknown.
    pub fn register<C: Command>(&self, role: &str) -> Result<CommandId, Error> {
        self.register_type(role, TypeId::of::<C>(), type_name::<C>())
    }

    pub(crate) fn register_type(
        &self,
        role: &str,
        type_id: TypeId,
        type_name: &'static str,
    ) -> Result<CommandId, Error> {
        if let Some(id) = self.id(role) {
            let roles = self.roles.borrow();
            let existing = &roles[id.get() as usize];
            if existing.type_id != type_id {
                return Err(Error::RoleTypeMismatch {
                    role: role.to_string(),
                    existing: existing.type_name,
                    requested: type_name,
                });
            }
            return Ok(id);
        }

        let mut roles = self.roles.borrow_mut();
        let id = CommandId::new(roles.len() as u32);
        roles.push(Role {
            name: role.to_string(),
            type_id,
            type_name,
        });
        self.ids.borrow_mut().insert(role.to_string(), id);
        Ok(id)
    }

    /// Identifier of `role`, if registered.
    pub fn id(&self, role: &str) -> Option<CommandId> {
        self.ids.borrow().get(role).copied()
    }

    /// Name of the role registered under `id`.
    pub fn role(&self, id: CommandId) -> Option<String> {
        self.roles
            .borrow()
            .get(id.get() as usize)
            .map(|role| role.name.clone())
    }

    /// Number of registered roles.
    pub fn len(&self) -> usize {
        self.roles.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.borrow().is_empty()
    }

    /// Create a reader for the commands of `role`.
    pub fn reader(&self, role: &str) -> Result<CommandReader, Error> {
        let id = self
            .id(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))?;
        let roles = self.roles.borrow();
        let entry = &roles[id.get() as usize];
        Ok(CommandReader {
            id,
            role: entry.name.clone(),
            type_name: entry.type_name,
        })
    }
}

/// Read access to the commands of another role.
#[derive(Clone, Debug)]
pub struct CommandReader {
    id: CommandId,
    role: String,
    type_name: &'static str,
}

impl CommandReader {
    pub fn id(&self) -> CommandId {
        self.id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    /// Name of the command type registered for the role.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_activated(&self, compound: &Compound) -> bool {
        compound.knows(self.id)
    }

    /// Borrow the role's command on `compound`.
    pub fn read<'a, C: Command>(&self, compound: &'a Compound) -> Result<Ref<'a, C>, Error> {
        compound.command::<C>(self.id)
    }
}
