//! Per-session tag table: the set of in-flight request tags, tracked so a
//! `Tflush` can name something to cancel.

use crate::error::{Error, ErrorKind};
use crate::fcall::NOTAG;

struct Slot {
    tag: u16,
    in_use: bool,
}

/// Fixed-capacity set of in-flight tags.
///
/// Grounded on `ninep_tag_table`: tag *values* are the array index, not an
/// arbitrary counter, which is why `alloc` below hands back `i as u16`
/// rather than synthesizing a value. `Session` never actually calls
/// `alloc`/`free` against this table: its `serve()` loop reads one frame,
/// dispatches it to completion, and writes the reply before reading the
/// next, so at most one request — and thus one tag — is ever outstanding,
/// and a pipelining client has no way to present a second one. The capacity
/// bookkeeping here exists for the same reason the slot array does: it is
/// the direct port of the original's fixed-size table, kept so a transport
/// that ever stops being strictly request/response (see
/// [`crate::transport::DatagramTransport`]'s reassembly, which still feeds
/// one complete frame at a time into the same serial loop) has somewhere to
/// grow into without a redesign.
pub struct TagTable {
    slots: Vec<Slot>,
}

impl TagTable {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity < NOTAG as usize, "tag table capacity must leave NOTAG unused");
        let slots = (0..capacity).map(|i| Slot { tag: i as u16, in_use: false }).collect();
        TagTable { slots }
    }

    pub fn alloc(&mut self) -> Result<u16, Error> {
        match self.slots.iter_mut().find(|s| !s.in_use) {
            Some(s) => {
                s.in_use = true;
                Ok(s.tag)
            }
            None => Err(ErrorKind::NoTags.into()),
        }
    }

    pub fn lookup(&self, tag: u16) -> Option<u16> {
        self.slots.get(tag as usize).filter(|s| s.in_use).map(|s| s.tag)
    }

    pub fn free(&mut self, tag: u16) -> Result<(), Error> {
        match self.slots.get_mut(tag as usize) {
            Some(s) if s.in_use => {
                s.in_use = false;
                Ok(())
            }
            _ => Err(ErrorKind::UnknownFid.into()),
        }
    }

    pub fn clear(&mut self) {
        for s in &mut self.slots {
            s.in_use = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_lookup_succeeds() {
        let mut t = TagTable::new(4);
        let tag = t.alloc().unwrap();
        assert_eq!(t.lookup(tag), Some(tag));
    }

    #[test]
    fn free_then_lookup_fails() {
        let mut t = TagTable::new(4);
        let tag = t.alloc().unwrap();
        t.free(tag).unwrap();
        assert_eq!(t.lookup(tag), None);
    }

    #[test]
    fn free_not_in_use_fails() {
        let mut t = TagTable::new(4);
        assert!(t.free(0).is_err());
    }

    #[test]
    fn exhaustion_fails_allocation() {
        let mut t = TagTable::new(2);
        t.alloc().unwrap();
        t.alloc().unwrap();
        assert!(t.alloc().is_err());
    }

    #[test]
    fn freed_tag_is_reusable() {
        let mut t = TagTable::new(1);
        let tag = t.alloc().unwrap();
        t.free(tag).unwrap();
        assert_eq!(t.alloc().unwrap(), tag);
    }
}
