//! Protocol constants and in-memory representation of 9P2000 messages.
//!
//! This mirrors the split the Plan 9 manual itself uses: [`QId`] and [`Stat`]
//! describe *files*, [`MsgType`] and [`FCall`] describe *messages on the wire*.

use bitflags::bitflags;
use enum_primitive::enum_from_primitive;

/// The only dialect string this server negotiates.
pub const P92000: &str = "9P2000";
/// Returned in `Rversion` when the client's string is not recognized.
pub const VERSION_UNKNOWN: &str = "unknown";

/// Reserved tag accompanying `Tversion`.
pub const NOTAG: u16 = !0;
/// Reserved fid meaning "no auth fid".
pub const NOFID: u32 = !0;

/// Smallest negotiable `msize`; values below this are rejected outright.
pub const MSIZE_MIN: u32 = 128;
/// Bytes of header overhead a `Tread`/`Twrite` body carries beyond its data,
/// used to clamp `count` against the negotiated `msize`.
pub const IOHDRSZ: u32 = 11;

/// Maximum path components accepted in a single `Twalk`.
pub const MAXWELEM: usize = 16;

bitflags! {
    /// Bits of [`QId::typ`]. `FILE` is the all-zero baseline, not a distinct bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QidType: u8 {
        const DIR    = 0x80;
        const APPEND = 0x40;
        const EXCL   = 0x20;
        const AUTH   = 0x08;
        const TMP    = 0x04;
        const FILE   = 0x00;
    }
}

bitflags! {
    /// Flags half of an open/create mode; the low two bits are an access mode
    /// ([`OpenMode::READ`]/`WRITE`/`RDWR`/`EXEC`), not independently OR-able bits
    /// — mask with [`OpenMode::ACCESS_MASK`] to recover it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OpenMode: u8 {
        const READ    = 0x00;
        const WRITE   = 0x01;
        const RDWR    = 0x02;
        const EXEC    = 0x03;
        const TRUNC   = 0x10;
        const RCLOSE  = 0x40;
    }
}

impl OpenMode {
    pub const ACCESS_MASK: u8 = 0x03;

    pub fn access(&self) -> u8 {
        self.bits() & Self::ACCESS_MASK
    }

    pub fn is_write_access(&self) -> bool {
        matches!(self.access(), 0x01 | 0x02)
    }

    pub fn truncate(&self) -> bool {
        self.contains(OpenMode::TRUNC)
    }

    pub fn remove_on_close(&self) -> bool {
        self.contains(OpenMode::RCLOSE)
    }
}

/// Stable 13-byte file identity: `type[1] version[4] path[8]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QId {
    pub typ: QidType,
    pub version: u32,
    pub path: u64,
}

impl QId {
    pub const SIZE: u32 = 13;

    pub fn size(&self) -> u32 {
        Self::SIZE
    }
}

pub const DONT_TOUCH_U32: u32 = !0;
pub const DONT_TOUCH_U64: u64 = !0;

/// Descriptive metadata record used by `Tstat`/`Rstat`/`Twstat`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Stat {
    pub typ: u16,
    pub dev: u32,
    pub qid: QId,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl Stat {
    /// Body length excluding the leading `size[2]` field itself.
    pub fn body_size(&self) -> u16 {
        let strs = 2 + self.name.len() + 2 + self.uid.len() + 2 + self.gid.len() + 2 + self.muid.len();
        (4 + 2 + QId::SIZE as usize + 4 + 4 + 4 + 8 + strs) as u16
    }
}

enum_from_primitive! {
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Tversion = 100,
    Rversion = 101,
    Tauth    = 102,
    Rauth    = 103,
    Tattach  = 104,
    Rattach  = 105,
    Rerror   = 107,
    Tflush   = 108,
    Rflush   = 109,
    Twalk    = 110,
    Rwalk    = 111,
    Topen    = 112,
    Ropen    = 113,
    Tcreate  = 114,
    Rcreate  = 115,
    Tread    = 116,
    Rread    = 117,
    Twrite   = 118,
    Rwrite   = 119,
    Tclunk   = 120,
    Rclunk   = 121,
    Tremove  = 122,
    Rremove  = 123,
    Tstat    = 124,
    Rstat    = 125,
    Twstat   = 126,
    Rwstat   = 127,
}
}

impl MsgType {
    pub fn is_t(&self) -> bool {
        (*self as u8) % 2 == 0
    }

    pub fn is_r(&self) -> bool {
        !self.is_t()
    }
}

impl From<&FCall> for MsgType {
    fn from(fcall: &FCall) -> MsgType {
        match fcall {
            FCall::Tversion { .. } => MsgType::Tversion,
            FCall::Rversion { .. } => MsgType::Rversion,
            FCall::Tauth { .. } => MsgType::Tauth,
            FCall::Rauth { .. } => MsgType::Rauth,
            FCall::Tattach { .. } => MsgType::Tattach,
            FCall::Rattach { .. } => MsgType::Rattach,
            FCall::Rerror { .. } => MsgType::Rerror,
            FCall::Tflush { .. } => MsgType::Tflush,
            FCall::Rflush => MsgType::Rflush,
            FCall::Twalk { .. } => MsgType::Twalk,
            FCall::Rwalk { .. } => MsgType::Rwalk,
            FCall::Topen { .. } => MsgType::Topen,
            FCall::Ropen { .. } => MsgType::Ropen,
            FCall::Tcreate { .. } => MsgType::Tcreate,
            FCall::Rcreate { .. } => MsgType::Rcreate,
            FCall::Tread { .. } => MsgType::Tread,
            FCall::Rread { .. } => MsgType::Rread,
            FCall::Twrite { .. } => MsgType::Twrite,
            FCall::Rwrite { .. } => MsgType::Rwrite,
            FCall::Tclunk { .. } => MsgType::Tclunk,
            FCall::Rclunk => MsgType::Rclunk,
            FCall::Tremove { .. } => MsgType::Tremove,
            FCall::Rremove => MsgType::Rremove,
            FCall::Tstat { .. } => MsgType::Tstat,
            FCall::Rstat { .. } => MsgType::Rstat,
            FCall::Twstat { .. } => MsgType::Twstat,
            FCall::Rwstat => MsgType::Rwstat,
        }
    }
}

/// In-memory form of every 9P2000 message body this server speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FCall {
    Tversion { msize: u32, version: String },
    Rversion { msize: u32, version: String },

    Tauth { afid: u32, uname: String, aname: String },
    Rauth { aqid: QId },

    Tattach { fid: u32, afid: u32, uname: String, aname: String },
    Rattach { qid: QId },

    Rerror { ename: String },

    Tflush { oldtag: u16 },
    Rflush,

    Twalk { fid: u32, newfid: u32, wnames: Vec<String> },
    Rwalk { wqids: Vec<QId> },

    Topen { fid: u32, mode: OpenMode },
    Ropen { qid: QId, iounit: u32 },

    Tcreate { fid: u32, name: String, perm: u32, mode: OpenMode },
    Rcreate { qid: QId, iounit: u32 },

    Tread { fid: u32, offset: u64, count: u32 },
    Rread { data: Vec<u8> },

    Twrite { fid: u32, offset: u64, data: Vec<u8> },
    Rwrite { count: u32 },

    Tclunk { fid: u32 },
    Rclunk,

    Tremove { fid: u32 },
    Rremove,

    Tstat { fid: u32 },
    Rstat { stat: Stat },

    Twstat { fid: u32, stat: Stat },
    Rwstat,
}

impl FCall {
    /// Fids this message references, in the order the session dispatcher
    /// should validate them before running type-specific logic.
    pub fn fids(&self) -> Vec<u32> {
        match self {
            FCall::Tattach { fid, .. } => vec![*fid],
            FCall::Twalk { fid, .. } => vec![*fid],
            FCall::Topen { fid, .. } => vec![*fid],
            FCall::Tcreate { fid, .. } => vec![*fid],
            FCall::Tread { fid, .. } => vec![*fid],
            FCall::Twrite { fid, .. } => vec![*fid],
            FCall::Tclunk { fid } => vec![*fid],
            FCall::Tremove { fid } => vec![*fid],
            FCall::Tstat { fid } => vec![*fid],
            FCall::Twstat { fid, .. } => vec![*fid],
            _ => vec![],
        }
    }

    /// The fid this message would newly bind on success, if any.
    pub fn newfid(&self) -> Option<u32> {
        match self {
            FCall::Twalk { newfid, .. } => Some(*newfid),
            _ => None,
        }
    }
}

/// A parsed message: the 16-bit tag plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub tag: u16,
    pub body: FCall,
}
