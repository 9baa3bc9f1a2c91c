use std::fmt;
use std::sync::Weak;

use error_printer::ErrorPrinter;
use parking_lot::{Condvar, Mutex};

use crate::error::CacheError;
use crate::manager::ManagerInner;
use crate::storage::{CacheStorage, StorageLocation};
use crate::CacheManager;

#[derive(Debug, Default)]
struct GateState {
    invalidated: bool,
    readers: usize,
    writing: bool,
}

/// Per-claim stream bookkeeping.
///
/// Every open stream holds a guard on the gate; readers share it, a writer holds it
/// exclusively. Invalidation flips the gate closed and then waits until every guard
/// has been dropped, so nothing is deleted or handed over while a stream is open.
#[derive(Debug, Default)]
pub(crate) struct ClaimGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ClaimGate {
    pub(crate) fn is_valid(&self) -> bool {
        !self.state.lock().invalidated
    }

    pub(crate) fn enter_read(&self) -> Result<ReaderGuard<'_>, CacheError> {
        let mut state = self.state.lock();
        while state.writing && !state.invalidated {
            self.cond.wait(&mut state);
        }
        if state.invalidated {
            return Err(CacheError::InvalidClaim);
        }
        state.readers += 1;
        Ok(ReaderGuard { gate: self })
    }

    pub(crate) fn enter_write(&self) -> Result<WriterGuard<'_>, CacheError> {
        let mut state = self.state.lock();
        while (state.writing || state.readers > 0) && !state.invalidated {
            self.cond.wait(&mut state);
        }
        if state.invalidated {
            return Err(CacheError::InvalidClaim);
        }
        state.writing = true;
        Ok(WriterGuard { gate: self })
    }

    /// Closes the gate and blocks until all open streams are done.
    /// Returns false if the gate was already closed.
    pub(crate) fn invalidate(&self) -> bool {
        let mut state = self.state.lock();
        if state.invalidated {
            return false;
        }
        state.invalidated = true;
        self.cond.notify_all();
        while state.readers > 0 || state.writing {
            self.cond.wait(&mut state);
        }
        true
    }
}

pub(crate) struct ReaderGuard<'a> {
    gate: &'a ClaimGate,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.readers -= 1;
        if state.readers == 0 {
            self.gate.cond.notify_all();
        }
    }
}

pub(crate) struct WriterGuard<'a> {
    gate: &'a ClaimGate,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.state.lock();
        state.writing = false;
        self.gate.cond.notify_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ClaimKind {
    Read,
    ReadWrite,
}

/// State shared by both claim kinds.
pub(crate) struct ClaimCore<S: CacheStorage> {
    pub(crate) id: u64,
    pub(crate) owner: u64,
    pub(crate) key: S::Key,
    pub(crate) location: std::sync::Arc<S::Location>,
    pub(crate) gate: ClaimGate,
    pub(crate) manager: Weak<ManagerInner<S>>,
    /// Whether dropping the claim hands it back to its manager.
    pub(crate) release_on_drop: bool,
}

impl<S: CacheStorage> ClaimCore<S> {
    fn release_dropped(&mut self, kind: ClaimKind) {
        if !std::mem::take(&mut self.release_on_drop) {
            return;
        }
        let Some(inner) = self.manager.upgrade() else {
            return;
        };
        let manager = CacheManager::from_inner(inner);
        let _ = manager
            .release_core(self, kind)
            .debug_error(format!("releasing dropped claim {} for {:?}", self.id, self.key));
        manager.policy().check_budget();
    }
}

/// Shared access to one cached artifact.
///
/// Obtained from [`CacheManager::request_read`]. While any read claim on a key is
/// valid, no write claim exists for it and the eviction policy cannot delete it.
/// Hand it back with [`CacheManager::release`]; dropping the claim releases it too.
pub struct ReadClaim<S: CacheStorage> {
    pub(crate) core: ClaimCore<S>,
}

/// Exclusive access to one cached artifact, including writing and deleting it.
///
/// Obtained from [`CacheManager::request_read_write`]. Turn it into a read claim with
/// [`CacheManager::degrade`] or hand it back with [`CacheManager::release`].
pub struct ReadWriteClaim<S: CacheStorage> {
    pub(crate) core: ClaimCore<S>,
}

macro_rules! claim_accessors {
    ($claim:ident) => {
        impl<S: CacheStorage> $claim<S> {
            pub(crate) fn from_core(core: ClaimCore<S>) -> Self {
                Self { core }
            }

            pub fn id(&self) -> u64 {
                self.core.id
            }

            pub fn key(&self) -> &S::Key {
                &self.core.key
            }

            /// False once the claim has been released or evicted.
            pub fn is_valid(&self) -> bool {
                self.core.gate.is_valid()
            }

            /// Size of the backing data in bytes, 0 if there is none.
            /// Answered even after the claim is invalidated.
            pub fn size(&self) -> i64 {
                self.core.location.size()
            }

            /// Whether the backing data exists. Answered even after the claim is invalidated.
            pub fn exists(&self) -> bool {
                self.core.location.exists()
            }
        }

        impl<S: CacheStorage> fmt::Debug for $claim<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($claim))
                    .field("id", &self.core.id)
                    .field("key", &self.core.key)
                    .field("valid", &self.is_valid())
                    .finish()
            }
        }
    };
}

claim_accessors!(ReadClaim);
claim_accessors!(ReadWriteClaim);

impl<S: CacheStorage> ReadWriteClaim<S> {
    /// Deletes the backing data, waiting for open streams of this claim to close.
    pub fn delete(&mut self) -> Result<(), CacheError> {
        let _guard = self.core.gate.enter_write()?;
        self.core.location.delete()
    }
}

impl<S: CacheStorage> Drop for ReadClaim<S> {
    fn drop(&mut self) {
        self.core.release_dropped(ClaimKind::Read);
    }
}

impl<S: CacheStorage> Drop for ReadWriteClaim<S> {
    fn drop(&mut self) {
        self.core.release_dropped(ClaimKind::ReadWrite);
    }
}

/// Either kind of claim, as accepted by [`CacheManager::release`].
pub enum Claim<S: CacheStorage> {
    Read(ReadClaim<S>),
    ReadWrite(ReadWriteClaim<S>),
}

impl<S: CacheStorage> Claim<S> {
    pub fn key(&self) -> &S::Key {
        &self.core().key
    }

    pub fn is_valid(&self) -> bool {
        self.core().gate.is_valid()
    }

    pub fn is_read_write(&self) -> bool {
        matches!(self, Claim::ReadWrite(_))
    }

    pub(crate) fn core(&self) -> &ClaimCore<S> {
        match self {
            Claim::Read(c) => &c.core,
            Claim::ReadWrite(c) => &c.core,
        }
    }

    /// Stops the drop hook from releasing the claim a second time.
    pub(crate) fn disarm(&mut self) -> (&ClaimCore<S>, ClaimKind) {
        match self {
            Claim::Read(c) => {
                c.core.release_on_drop = false;
                (&c.core, ClaimKind::Read)
            },
            Claim::ReadWrite(c) => {
                c.core.release_on_drop = false;
                (&c.core, ClaimKind::ReadWrite)
            },
        }
    }
}

impl<S: CacheStorage> fmt::Debug for Claim<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Claim::Read(c) => c.fmt(f),
            Claim::ReadWrite(c) => c.fmt(f),
        }
    }
}

impl<S: CacheStorage> From<ReadClaim<S>> for Claim<S> {
    fn from(claim: ReadClaim<S>) -> Self {
        Claim::Read(claim)
    }
}

impl<S: CacheStorage> From<ReadWriteClaim<S>> for Claim<S> {
    fn from(claim: ReadWriteClaim<S>) -> Self {
        Claim::ReadWrite(claim)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_gate_readers_share() {
        let gate = ClaimGate::default();
        let r1 = gate.enter_read().unwrap();
        let r2 = gate.enter_read().unwrap();
        drop(r1);
        drop(r2);
        let _w = gate.enter_write().unwrap();
    }

    #[test]
    fn test_gate_rejects_after_invalidate() {
        let gate = ClaimGate::default();
        assert!(gate.invalidate());
        assert!(!gate.invalidate());
        assert!(!gate.is_valid());
        assert!(matches!(gate.enter_read(), Err(CacheError::InvalidClaim)));
        assert!(matches!(gate.enter_write(), Err(CacheError::InvalidClaim)));
    }

    #[test]
    fn test_invalidate_waits_for_open_reader() {
        let gate = ClaimGate::default();
        let reader_done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let guard = gate.enter_read().unwrap();
            let reader_done = &reader_done;
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                reader_done.store(true, Ordering::SeqCst);
                drop(guard);
            });

            assert!(gate.invalidate());
            assert!(reader_done.load(Ordering::SeqCst));
        });
    }

    #[test]
    fn test_writer_waits_for_reader() {
        let gate = ClaimGate::default();
        let reader_done = AtomicBool::new(false);

        std::thread::scope(|s| {
            let guard = gate.enter_read().unwrap();
            let reader_done = &reader_done;
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                reader_done.store(true, Ordering::SeqCst);
                drop(guard);
            });

            let _w = gate.enter_write().unwrap();
            assert!(reader_done.load(Ordering::SeqCst));
        });
    }
}
