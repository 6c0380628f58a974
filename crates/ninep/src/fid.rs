//! Per-session fid table: fixed-capacity map from client-chosen fid numbers
//! to server-held file handles.

use crate::error::{Error, ErrorKind};
use crate::fcall::{OpenMode, QId};

/// Server-side state bound to one client fid.
#[derive(Debug, Clone)]
pub struct FidEntry<H> {
    pub qid: QId,
    pub handle: H,
    pub open_mode: Option<OpenMode>,
    pub offset: u64,
}

impl<H> FidEntry<H> {
    fn new(qid: QId, handle: H) -> Self {
        FidEntry { qid, handle, open_mode: None, offset: 0 }
    }

    pub fn is_open(&self) -> bool {
        self.open_mode.is_some()
    }
}

struct Slot<H> {
    fid: u32,
    entry: Option<FidEntry<H>>,
}

/// Fixed-capacity fid table, one per session.
///
/// A plain linear-scan slot array, the direct port of
/// `struct ninep_fid_table` — fid numbers are client-chosen and sparse, so a
/// `HashMap` would also work, but the original's bounded, no-growth slot
/// array is kept to preserve the "no allocation after session start" property
/// small devices rely on.
pub struct FidTable<H> {
    slots: Vec<Slot<H>>,
}

impl<H> FidTable<H> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(Slot { fid: 0, entry: None });
        }
        FidTable { slots }
    }

    fn find(&self, fid: u32) -> Option<usize> {
        self.slots.iter().position(|s| s.entry.is_some() && s.fid == fid)
    }

    /// Reserve `fid` with no qid bound yet. Fails if already in use or the
    /// table is full.
    pub fn alloc(&mut self, fid: u32, qid: QId, handle: H) -> Result<(), Error> {
        if self.find(fid).is_some() {
            return Err(ErrorKind::FidInUse.into());
        }
        let free = self.slots.iter().position(|s| s.entry.is_none());
        match free {
            Some(i) => {
                self.slots[i] = Slot { fid, entry: Some(FidEntry::new(qid, handle)) };
                Ok(())
            }
            None => Err(ErrorKind::NoFids.into()),
        }
    }

    pub fn lookup(&self, fid: u32) -> Result<&FidEntry<H>, Error> {
        self.find(fid)
            .and_then(|i| self.slots[i].entry.as_ref())
            .ok_or_else(|| ErrorKind::UnknownFid.into())
    }

    pub fn lookup_mut(&mut self, fid: u32) -> Result<&mut FidEntry<H>, Error> {
        match self.find(fid) {
            Some(i) => self.slots[i].entry.as_mut().ok_or_else(|| ErrorKind::UnknownFid.into()),
            None => Err(ErrorKind::UnknownFid.into()),
        }
    }

    pub fn contains(&self, fid: u32) -> bool {
        self.find(fid).is_some()
    }

    pub fn free(&mut self, fid: u32) -> Result<FidEntry<H>, Error> {
        match self.find(fid) {
            Some(i) => Ok(self.slots[i].entry.take().expect("slot located by find() always holds an entry")),
            None => Err(ErrorKind::UnknownFid.into()),
        }
    }

    /// Release every fid, returning their handles so the caller can drop
    /// backend resources. Used when a session disconnects or re-negotiates.
    pub fn clear(&mut self) -> Vec<FidEntry<H>> {
        self.slots.iter_mut().filter_map(|s| s.entry.take()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qid(path: u64) -> QId {
        QId { typ: Default::default(), version: 0, path }
    }

    #[test]
    fn alloc_then_lookup_returns_entry() {
        let mut t: FidTable<()> = FidTable::new(4);
        t.alloc(3, qid(1), ()).unwrap();
        assert_eq!(t.lookup(3).unwrap().qid, qid(1));
    }

    #[test]
    fn lookup_unknown_fid_fails() {
        let t: FidTable<()> = FidTable::new(4);
        assert!(matches!(t.lookup(9), Err(Error::Proto(ErrorKind::UnknownFid))));
    }

    #[test]
    fn alloc_duplicate_fid_fails() {
        let mut t: FidTable<()> = FidTable::new(4);
        t.alloc(1, qid(1), ()).unwrap();
        assert!(matches!(t.alloc(1, qid(2), ()), Err(Error::Proto(ErrorKind::FidInUse))));
    }

    #[test]
    fn free_then_lookup_fails() {
        let mut t: FidTable<()> = FidTable::new(4);
        t.alloc(1, qid(1), ()).unwrap();
        t.free(1).unwrap();
        assert!(matches!(t.lookup(1), Err(Error::Proto(ErrorKind::UnknownFid))));
    }

    #[test]
    fn free_unknown_fid_fails() {
        let mut t: FidTable<()> = FidTable::new(4);
        assert!(matches!(t.free(1), Err(Error::Proto(ErrorKind::UnknownFid))));
    }

    #[test]
    fn exhaustion_fails_on_the_fid_beyond_capacity() {
        let mut t: FidTable<()> = FidTable::new(2);
        t.alloc(1, qid(1), ()).unwrap();
        t.alloc(2, qid(2), ()).unwrap();
        assert!(matches!(t.alloc(3, qid(3), ()), Err(Error::Proto(ErrorKind::NoFids))));
    }

    #[test]
    fn freed_slot_is_reusable() {
        let mut t: FidTable<()> = FidTable::new(1);
        t.alloc(1, qid(1), ()).unwrap();
        t.free(1).unwrap();
        t.alloc(2, qid(2), ()).unwrap();
        assert_eq!(t.lookup(2).unwrap().qid, qid(2));
    }
}
