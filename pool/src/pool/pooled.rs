use super::state::{IdleClient, PoolState};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::Notify;

/// State shared between the pool and every client handle it gives out
#[derive(Debug)]
pub(crate) struct Shared<C> {
    state: Mutex<PoolState<C>>,
    /// Woken whenever a slot or an idle client frees up, or the pool closes
    capacity: Notify,
}

impl<C> Shared<C> {
    pub(crate) fn new(state: PoolState<C>) -> Self {
        Self {
            state: Mutex::new(state),
            capacity: Notify::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolState<C>> {
        // bookkeeping is never left half updated, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn capacity(&self) -> &Notify {
        &self.capacity
    }

    pub(crate) fn notify(&self) {
        self.capacity.notify_waiters();
    }
}

/// A client checked out of a [`crate::KeyedClientPool`]
///
/// Derefs to the underlying client. Hand it back with
/// [`crate::KeyedClientPool::return_client`], or report it broken with
/// [`crate::KeyedClientPool::invalidate`]. A handle that is simply dropped gives up its slot and
/// the client is dropped with it, without going through the factory.
pub struct PooledClient<C> {
    client: Option<C>,
    id: u64,
    key: String,
    created_at: Instant,
    borrowed_at: Instant,
    last_returned_at: Option<Instant>,
    borrow_count: u64,
    shared: Weak<Shared<C>>,
}

impl<C> PooledClient<C> {
    pub(crate) fn created(client: C, id: u64, key: &str, shared: &Arc<Shared<C>>) -> Self {
        let now = Instant::now();
        Self {
            client: Some(client),
            id,
            key: key.to_string(),
            created_at: now,
            borrowed_at: now,
            last_returned_at: None,
            borrow_count: 1,
            shared: Arc::downgrade(shared),
        }
    }

    pub(crate) fn checked_out(idle: IdleClient<C>, key: &str, shared: &Arc<Shared<C>>) -> Self {
        Self {
            client: Some(idle.client),
            id: idle.id,
            key: key.to_string(),
            created_at: idle.created_at,
            borrowed_at: Instant::now(),
            last_returned_at: Some(idle.idle_since),
            borrow_count: idle.borrow_count + 1,
            shared: Arc::downgrade(shared),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn borrowed_at(&self) -> Instant {
        self.borrowed_at
    }

    /// When the client was last handed back to the pool, `None` for a freshly created client
    pub fn last_returned_at(&self) -> Option<Instant> {
        self.last_returned_at
    }

    pub fn borrow_count(&self) -> u64 {
        self.borrow_count
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared<C>>) -> bool {
        Weak::ptr_eq(&self.shared, &Arc::downgrade(shared))
    }

    /// Takes the client out, the handle no longer touches the bookkeeping when dropped
    pub(crate) fn take(&mut self) -> Option<C> {
        self.client.take()
    }

    pub(crate) fn into_idle(mut self, now: Instant) -> Option<IdleClient<C>> {
        let client = self.client.take()?;
        Some(IdleClient {
            id: self.id,
            client,
            created_at: self.created_at,
            idle_since: now,
            borrow_count: self.borrow_count,
        })
    }
}

impl<C> Deref for PooledClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        // only None once consumed by the pool
        self.client.as_ref().unwrap()
    }
}

impl<C> DerefMut for PooledClient<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.client.as_mut().unwrap()
    }
}

impl<C> Drop for PooledClient<C> {
    fn drop(&mut self) {
        if self.client.is_none() {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            tracing::warn!(
                key = %self.key,
                id = self.id,
                "Pooled client dropped without being returned, discarding"
            );
            shared.lock().discard_active(&self.key, self.id);
            shared.notify();
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for PooledClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledClient")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("client", &self.client)
            .field("borrow_count", &self.borrow_count)
            .finish()
    }
}

/// A pending slot reserved under a key. Dropping it before installing a client gives the slot
/// back, so a cancelled borrow never leaks capacity.
pub(crate) struct SlotReservation<C> {
    shared: Arc<Shared<C>>,
    key: String,
    warm: bool,
    armed: bool,
}

impl<C> SlotReservation<C> {
    /// The slot must already be counted as pending under `key`
    pub(crate) fn new(shared: &Arc<Shared<C>>, key: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(shared),
            key: key.into(),
            warm: false,
            armed: true,
        }
    }

    /// A slot counted as warming under `key`, for a client headed for the idle set
    pub(crate) fn warming(shared: &Arc<Shared<C>>, key: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(shared),
            key: key.into(),
            warm: true,
            armed: true,
        }
    }

    /// Gives the client back if the pool closed while it was being created
    pub(crate) fn install_active(mut self, client: C) -> Result<PooledClient<C>, C> {
        self.armed = false;
        let id = self.shared.lock().install_active(&self.key);
        match id {
            Some(id) => Ok(PooledClient::created(client, id, &self.key, &self.shared)),
            None => {
                self.shared.notify();
                Err(client)
            }
        }
    }

    pub(crate) fn install_idle(mut self, client: C) -> Result<(), C> {
        self.armed = false;
        let result = self
            .shared
            .lock()
            .install_idle(&self.key, client, Instant::now());
        self.shared.notify();
        result
    }

    pub(crate) fn restore_idle(mut self, idle: IdleClient<C>) -> Result<(), C> {
        self.armed = false;
        let result = self.shared.lock().restore_idle(&self.key, idle);
        self.shared.notify();
        result
    }

    /// Frees the slot of a client that failed validation and is about to be destroyed
    pub(crate) fn discard_invalid(mut self) {
        self.armed = false;
        {
            let mut state = self.shared.lock();
            state.record_validation_failure();
            state.discard_reservation(&self.key, self.warm);
        }
        self.shared.notify();
    }
}

impl<C> Drop for SlotReservation<C> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().cancel_reservation(&self.key, self.warm);
            self.shared.notify();
        }
    }
}
