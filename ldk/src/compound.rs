use crate::{Bits, Command, CommandId, CommandPool, Error};
use bytes::Bytes;
use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    rc::Rc,
    time::SystemTime,
};

/// A stop of a compound on its way through the stacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Visit {
    pub at: SystemTime,
    pub location: String,
}

struct Inner {
    pool: RefCell<CommandPool>,
    payload: Option<Bytes>,
    journey: RefCell<Vec<Visit>>,
}

/// The unit of data exchanged between functional units.
///
/// A compound couples a [CommandPool] with an optional, immutable payload.
/// Cloning a `Compound` is cheap and yields another handle to the same
/// compound (a buffer and a retransmission window may hold the same one).
/// [Compound::copy] produces an independent compound instead.
#[derive(Clone)]
pub struct Compound {
    inner: Rc<Inner>,
}

impl Compound {
    /// Create a compound carrying `payload` (sized by its byte length).
    pub fn new(payload: Option<Bytes>) -> Self {
        let bits = payload
            .as_ref()
            .map(|payload| payload.len() as Bits * 8)
            .unwrap_or_default();
        Self::with_pool(CommandPool::new(bits), payload)
    }

    /// Create a compound with a synthetic payload of `bits` bits.
    pub fn sized(bits: Bits) -> Self {
        Self::with_pool(CommandPool::new(bits), None)
    }

    fn with_pool(pool: CommandPool, payload: Option<Bytes>) -> Self {
        Self {
            inner: Rc::new(Inner {
                pool: RefCell::new(pool),
                payload,
                journey: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.inner.payload.as_ref()
    }

    /// Size of the payload in bits.
    pub fn payload_bits(&self) -> Bits {
        self.inner.pool.borrow().data_bits()
    }

    /// Total length on the wire: the peer regions of every activated command
    /// plus the payload.
    pub fn length_bits(&self) -> Bits {
        self.inner
            .pool
            .borrow()
            .calculate_sizes(None)
            .map(|sizes| sizes.total())
            .unwrap_or_default()
    }

    /// Independent compound with a deep copy of the command pool.
    ///
    /// The payload is immutable and shared.
    pub fn copy(&self) -> Compound {
        let copy = Self::with_pool(self.inner.pool.borrow().clone(), self.inner.payload.clone());
        *copy.inner.journey.borrow_mut() = self.inner.journey.borrow().clone();
        copy
    }

    /// Independent compound holding the commands activated up to and
    /// including `initiator`.
    pub fn partial_copy(&self, initiator: CommandId) -> Result<Compound, Error> {
        let pool = self.inner.pool.borrow().partial_copy(initiator)?;
        Ok(Self::with_pool(pool, self.inner.payload.clone()))
    }

    /// Returns whether both handles refer to the same compound.
    pub fn same(&self, other: &Compound) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Borrow the command pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool is mutably borrowed.
    pub fn pool(&self) -> Ref<'_, CommandPool> {
        self.inner.pool.borrow()
    }

    /// Mutably borrow the command pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool is borrowed.
    pub fn pool_mut(&self) -> RefMut<'_, CommandPool> {
        self.inner.pool.borrow_mut()
    }

    pub fn knows(&self, id: CommandId) -> bool {
        self.inner.pool.borrow().knows(id)
    }

    /// Borrow the command stored under `id` as a `C`.
    pub fn command<C: Command>(&self, id: CommandId) -> Result<Ref<'_, C>, Error> {
        let pool = self.inner.pool.borrow();
        pool.get_as::<C>(id)?;
        Ok(Ref::map(pool, |pool| {
            pool.get_as::<C>(id).expect("command checked above")
        }))
    }

    /// Mutably borrow the command stored under `id` as a `C`.
    pub fn command_mut<C: Command>(&self, id: CommandId) -> Result<RefMut<'_, C>, Error> {
        let mut pool = self.inner.pool.borrow_mut();
        pool.get_as_mut::<C>(id)?;
        Ok(RefMut::map(pool, |pool| {
            pool.get_as_mut::<C>(id).expect("command checked above")
        }))
    }

    /// Record a stop on the compound's journey.
    pub fn visit(&self, at: SystemTime, location: impl Into<String>) {
        self.inner.journey.borrow_mut().push(Visit {
            at,
            location: location.into(),
        });
    }

    /// Stops recorded so far, oldest first.
    pub fn journey(&self) -> Vec<Visit> {
        self.inner.journey.borrow().clone()
    }
}

impl fmt::Debug for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compound")
            .field("length", &self.length_bits())
            .field("pool", &*self.inner.pool.borrow())
            .finish()
    }
}
