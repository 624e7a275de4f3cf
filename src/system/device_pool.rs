// src/system/device_pool.rs

use crate::core::collaborators::DeviceAllocator;
use crate::models::DeviceHandle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;
use thiserror::Error;

/// Misuse of the pool. Waiting for a busy device is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was built without devices.
    #[error("The device pool is empty; no device can ever become available.")]
    Empty,
    /// `allocate` named a device the pool does not own.
    #[error("Device '{udid}' is not part of the pool.")]
    UnknownDevice {
        /// The device asked for.
        udid: String,
    },
    /// `allocate` named a device another thread holds.
    #[error("Device '{udid}' is held by another thread.")]
    HeldElsewhere {
        /// The device asked for.
        udid: String,
    },
    /// `free` was called by a thread without a device.
    #[error("The calling thread holds no device.")]
    NothingHeld,
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<DeviceHandle>,
    held: HashMap<ThreadId, DeviceHandle>,
}

/// A finite set of devices shared by the worker threads.
///
/// `next_available` reserves a device for the calling thread, blocking while all
/// devices are busy; `free` hands it back and wakes one waiter.
#[derive(Debug)]
pub struct DevicePool {
    state: Mutex<PoolState>,
    released: Condvar,
    size: usize,
}

impl DevicePool {
    /// A pool where every device in `devices` starts idle.
    pub fn new(devices: impl IntoIterator<Item = DeviceHandle>) -> Self {
        let idle: VecDeque<_> = devices.into_iter().collect();
        let size = idle.len();
        Self {
            state: Mutex::new(PoolState {
                idle,
                held: HashMap::new(),
            }),
            released: Condvar::new(),
            size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of devices, idle or held.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of devices no thread holds.
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    /// The device held by the calling thread.
    pub fn held_by_current_thread(&self) -> Option<DeviceHandle> {
        self.lock().held.get(&std::thread::current().id()).cloned()
    }

    fn reserve(&self) -> Result<DeviceHandle, PoolError> {
        if self.size == 0 {
            return Err(PoolError::Empty);
        }
        let me = std::thread::current().id();
        let mut state = self.lock();
        if let Some(device) = state.held.get(&me) {
            return Ok(device.clone());
        }
        loop {
            if let Some(device) = state.idle.pop_front() {
                log::debug!("Reserved device {} for {:?}.", device.udid, me);
                state.held.insert(me, device.clone());
                return Ok(device);
            }
            log::trace!("{:?} waiting for a free device.", me);
            state = self
                .released
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn bind(&self, device: &DeviceHandle) -> Result<(), PoolError> {
        let me = std::thread::current().id();
        let mut state = self.lock();
        if state.held.get(&me).is_some_and(|d| d.udid == device.udid) {
            return Ok(());
        }
        if state.held.values().any(|d| d.udid == device.udid) {
            return Err(PoolError::HeldElsewhere {
                udid: device.udid.clone(),
            });
        }
        let position = state
            .idle
            .iter()
            .position(|d| d.udid == device.udid)
            .ok_or_else(|| PoolError::UnknownDevice {
                udid: device.udid.clone(),
            })?;
        let claimed = state.idle.remove(position).ok_or_else(|| PoolError::UnknownDevice {
            udid: device.udid.clone(),
        })?;
        // A thread holds one device; switching hands the previous one back.
        if let Some(previous) = state.held.insert(me, claimed) {
            state.idle.push_back(previous);
            self.released.notify_one();
        }
        Ok(())
    }

    fn release(&self) -> Result<(), PoolError> {
        let me = std::thread::current().id();
        let mut state = self.lock();
        let device = state.held.remove(&me).ok_or(PoolError::NothingHeld)?;
        log::debug!("Device {} returned to the pool by {:?}.", device.udid, me);
        state.idle.push_back(device);
        self.released.notify_one();
        Ok(())
    }
}

impl DeviceAllocator for DevicePool {
    fn next_available(&self) -> anyhow::Result<DeviceHandle> {
        Ok(self.reserve()?)
    }

    fn allocate(&self, device: &DeviceHandle) -> anyhow::Result<()> {
        Ok(self.bind(device)?)
    }

    fn free(&self) -> anyhow::Result<()> {
        Ok(self.release()?)
    }
}
