//! The session pool: allocates independent sessions over a shared listener.
//!
//! A direct port of `ninep_session_pool`'s slot lifecycle
//! (`Free -> Allocated -> Connected -> Disconnecting -> Free`), with the
//! mutex scoped exactly the way the original holds it — around slot search
//! and state update only, never across a transport or backend call.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::fs::Filesystem;
use crate::session::Session;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Allocated,
    Connected,
    Disconnecting,
}

struct Slot {
    state: SlotState,
    session_id: usize,
}

/// Fixed-size array of session slots sharing one filesystem backend.
///
/// Each accepted connection gets its own fid/tag namespace (inside the
/// [`Session`] it owns); the backend behind `fs` is the only state visible
/// to more than one session at a time.
pub struct SessionPool<Fs: Filesystem> {
    slots: Mutex<Vec<Slot>>,
    fs: Arc<Fs>,
    config: Config,
}

impl<Fs: Filesystem + 'static> SessionPool<Fs> {
    pub fn new(fs: Arc<Fs>, config: Config) -> Self {
        let slots = (0..config.max_sessions)
            .map(|session_id| Slot { state: SlotState::Free, session_id })
            .collect();
        SessionPool { slots: Mutex::new(slots), fs, config }
    }

    /// Find a free slot and mark it `Allocated`, returning its index, or
    /// `None` if the pool is exhausted.
    async fn alloc_slot(&self) -> Option<usize> {
        let mut slots = self.slots.lock().await;
        match slots.iter().position(|s| s.state == SlotState::Free) {
            Some(i) => {
                slots[i].state = SlotState::Allocated;
                info!("allocated session {}", slots[i].session_id);
                Some(i)
            }
            None => {
                warn!("session pool exhausted ({} slots)", slots.len());
                None
            }
        }
    }

    async fn mark_connected(&self, index: usize) {
        let mut slots = self.slots.lock().await;
        slots[index].state = SlotState::Connected;
    }

    async fn free_slot(&self, index: usize) {
        let mut slots = self.slots.lock().await;
        slots[index].state = SlotState::Disconnecting;
        let id = slots[index].session_id;
        slots[index].state = SlotState::Free;
        info!("freeing session {}", id);
    }

    /// Accept one connection's worth of transport, run its session to
    /// completion, and return the slot to the pool. Returns `Ok(None)` if the
    /// pool was exhausted (the caller should refuse or queue the transport).
    pub async fn accept(&self, transport: Box<dyn Transport>) -> std::io::Result<Option<()>> {
        let Some(index) = self.alloc_slot().await else {
            return Ok(None);
        };

        self.mark_connected(index).await;
        let mut session = Session::new(transport, self.fs.clone(), self.config.clone());
        let result = session.serve().await;
        self.free_slot(index).await;

        if let Err(e) = result {
            warn!("session ended with error: {}", e);
        }
        Ok(Some(()))
    }

    /// Free every non-free slot. Intended for shutdown: in-flight sessions
    /// are not forcibly aborted here (the caller owns their tasks), this
    /// only resets bookkeeping so a restarted pool starts clean.
    pub async fn disconnect_all(&self) {
        let mut slots = self.slots.lock().await;
        for s in slots.iter_mut().filter(|s| s.state != SlotState::Free) {
            info!("freeing session {}", s.session_id);
            s.state = SlotState::Free;
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.slots.lock().await.iter().filter(|s| s.state != SlotState::Free).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fcall::{OpenMode, QId, Stat};
    use async_trait::async_trait;

    #[derive(Clone)]
    struct EmptyFs;

    #[async_trait]
    impl Filesystem for EmptyFs {
        type Handle = ();

        async fn root(&self) -> Result<((), QId), Error> {
            Ok(((), QId::default()))
        }
        async fn walk(&self, _: &(), _: &str) -> Result<((), QId), Error> {
            Err(crate::error::ErrorKind::NotFound.into())
        }
        async fn open(&self, _: &(), _: OpenMode) -> Result<(), Error> {
            Ok(())
        }
        async fn create(&self, _: &(), _: &str, _: u32, _: OpenMode) -> Result<((), QId), Error> {
            Err(crate::error::ErrorKind::Denied.into())
        }
        async fn read(&self, _: &(), _: u64, _: &mut [u8]) -> Result<u32, Error> {
            Ok(0)
        }
        async fn write(&self, _: &(), _: u64, _: &[u8]) -> Result<u32, Error> {
            Ok(0)
        }
        async fn clunk(&self, _: &()) -> Result<(), Error> {
            Ok(())
        }
        async fn remove(&self, _: &()) -> Result<(), Error> {
            Ok(())
        }
        async fn stat(&self, _: &()) -> Result<Stat, Error> {
            Ok(Stat::default())
        }
        async fn wstat(&self, _: &(), _: &Stat) -> Result<(), Error> {
            Ok(())
        }
        async fn readdir(&self, _: &(), _: usize, _: usize) -> Result<Vec<Stat>, Error> {
            Ok(vec![])
        }
        async fn is_dir(&self, _: &()) -> Result<bool, Error> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn alloc_slot_exhaustion_returns_none() {
        let pool = SessionPool::new(Arc::new(EmptyFs), Config { max_sessions: 1, ..Config::default() });
        let a = pool.alloc_slot().await;
        assert!(a.is_some());
        let b = pool.alloc_slot().await;
        assert!(b.is_none());
    }

    #[tokio::test]
    async fn freeing_a_slot_makes_it_available_again() {
        let pool = SessionPool::new(Arc::new(EmptyFs), Config { max_sessions: 1, ..Config::default() });
        let i = pool.alloc_slot().await.unwrap();
        pool.free_slot(i).await;
        assert!(pool.alloc_slot().await.is_some());
    }

    #[tokio::test]
    async fn disconnect_all_frees_every_slot() {
        let pool = SessionPool::new(Arc::new(EmptyFs), Config { max_sessions: 2, ..Config::default() });
        pool.alloc_slot().await.unwrap();
        pool.alloc_slot().await.unwrap();
        pool.disconnect_all().await;
        assert_eq!(pool.active_sessions().await, 0);
    }
}
