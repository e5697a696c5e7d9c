//! Re-entrancy guard around the manager state.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use crate::error::{Error, Result};

/// Serializes access to `T` and rejects re-entry from the thread that
/// already holds it.
///
/// Calls from other threads wait for the lock. A call from the holding
/// thread (for instance a venue adapter calling back into the manager)
/// fails with [`Error::ReentrantCall`] instead of deadlocking.
#[derive(Debug)]
pub struct ReentrancyGuard<T> {
    owner: Mutex<Option<ThreadId>>,
    state: Mutex<T>,
}

/// Exclusive access to the guarded state. Releases ownership on drop.
pub struct Entered<'a, T> {
    state: MutexGuard<'a, T>,
    owner: &'a Mutex<Option<ThreadId>>,
}

impl<T> ReentrancyGuard<T> {
    pub fn new(state: T) -> Self {
        Self {
            owner: Mutex::new(None),
            state: Mutex::new(state),
        }
    }

    pub fn enter(&self) -> Result<Entered<'_, T>> {
        let me = thread::current().id();
        if *self.owner.lock().map_err(|_| Error::Poisoned)? == Some(me) {
            return Err(Error::ReentrantCall);
        }
        let state = self.state.lock().map_err(|_| Error::Poisoned)?;
        *self.owner.lock().map_err(|_| Error::Poisoned)? = Some(me);
        Ok(Entered {
            state,
            owner: &self.owner,
        })
    }

    /// True while some thread holds the state.
    pub fn is_entered(&self) -> bool {
        self.owner.lock().map(|o| o.is_some()).unwrap_or(true)
    }
}

impl<T> Deref for Entered<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.state
    }
}

impl<T> DerefMut for Entered<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.state
    }
}

impl<T> Drop for Entered<'_, T> {
    fn drop(&mut self) {
        *self.owner.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
