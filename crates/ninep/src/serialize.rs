//! Encode/decode 9P2000 messages to/from binary.
//!
//! Framing (the leading `size[4]`) is a transport concern — see
//! [`crate::transport`] — so [`Msg::encode`]/[`Msg::decode`] deal only with
//! `type[1] tag[2] body`.

use crate::fcall::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_traits::FromPrimitive;
use std::io::{Read, Result};
use std::mem;
use std::ops::{Shl, Shr};

macro_rules! decode {
    ($decoder:expr) => {
        Decodable::decode(&mut $decoder)?
    };

    ($typ:ident, $buf:expr) => {
        $typ::from_bits_truncate(decode!($buf))
    };
}

fn read_exact<R: Read + ?Sized>(r: &mut R, size: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0; size];
    r.read_exact(&mut buf[..]).and(Ok(buf))
}

/// A serializing-specific result to overload operators on `Result`.
///
/// # Overloaded operators
/// <<, >>
pub struct SResult<T>(::std::io::Result<T>);

/// A wrapper around `WriteBytesExt` providing `<<` for terse field-by-field
/// encoding: `Encoder::new(w) << &a << &b << &c`.
#[derive(Clone, Debug)]
pub struct Encoder<W> {
    writer: W,
    bytes: usize,
}

impl<W: WriteBytesExt> Encoder<W> {
    pub fn new(writer: W) -> Encoder<W> {
        Encoder { writer, bytes: 0 }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes
    }

    pub fn encode<T: Encodable>(&mut self, data: &T) -> Result<usize> {
        let bytes = data.encode(&mut self.writer)?;
        self.bytes += bytes;
        Ok(bytes)
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for Encoder<W> {
    type Output = SResult<Encoder<W>>;
    fn shl(mut self, rhs: &'a T) -> Self::Output {
        match self.encode(rhs) {
            Ok(_) => SResult(Ok(self)),
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Encodable, W: WriteBytesExt> Shl<&'a T> for SResult<Encoder<W>> {
    type Output = Self;
    fn shl(self, rhs: &'a T) -> Self::Output {
        match self.0 {
            Ok(mut encoder) => match encoder.encode(rhs) {
                Ok(_) => SResult(Ok(encoder)),
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A wrapper around `ReadBytesExt` providing `>>` for terse decoding.
#[derive(Clone, Debug)]
pub struct Decoder<R> {
    reader: R,
}

impl<R: ReadBytesExt> Decoder<R> {
    pub fn new(reader: R) -> Decoder<R> {
        Decoder { reader }
    }
    pub fn decode<T: Decodable>(&mut self) -> Result<T> {
        Decodable::decode(&mut self.reader)
    }
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for Decoder<R> {
    type Output = SResult<Decoder<R>>;
    fn shr(mut self, rhs: &'a mut T) -> Self::Output {
        match self.decode() {
            Ok(r) => {
                *rhs = r;
                SResult(Ok(self))
            }
            Err(e) => SResult(Err(e)),
        }
    }
}

impl<'a, T: Decodable, R: ReadBytesExt> Shr<&'a mut T> for SResult<Decoder<R>> {
    type Output = Self;
    fn shr(self, rhs: &'a mut T) -> Self::Output {
        match self.0 {
            Ok(mut decoder) => match decoder.decode() {
                Ok(r) => {
                    *rhs = r;
                    SResult(Ok(decoder))
                }
                Err(e) => SResult(Err(e)),
            },
            Err(e) => SResult(Err(e)),
        }
    }
}

/// A type which can be serialized into binary.
pub trait Encodable {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize>;
}

/// A type which can be deserialized from binary.
pub trait Decodable: Sized {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self>;
}

impl Encodable for u8 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u8(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u8 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u8()
    }
}

impl Encodable for u16 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u16::<LittleEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u16 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u16::<LittleEndian>()
    }
}

impl Encodable for u32 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u32::<LittleEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u32 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u32::<LittleEndian>()
    }
}

impl Encodable for u64 {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        w.write_u64::<LittleEndian>(*self).and(Ok(mem::size_of::<Self>()))
    }
}
impl Decodable for u64 {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        r.read_u64::<LittleEndian>()
    }
}

impl Encodable for String {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let mut bytes = (self.len() as u16).encode(w)?;
        bytes += w.write_all(self.as_bytes()).and(Ok(self.len()))?;
        Ok(bytes)
    }
}
impl Decodable for String {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let bytes = read_exact(r, len as usize)?;
        String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

impl Encodable for QId {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match Encoder::new(w) << &self.typ.bits() << &self.version << &self.path {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}
impl Decodable for QId {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        Ok(QId {
            typ: decode!(QidType, *r),
            version: Decodable::decode(r)?,
            path: Decodable::decode(r)?,
        })
    }
}

impl Encodable for Stat {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match Encoder::new(w)
            << &self.body_size()
            << &self.typ
            << &self.dev
            << &self.qid
            << &self.mode
            << &self.atime
            << &self.mtime
            << &self.length
            << &self.name
            << &self.uid
            << &self.gid
            << &self.muid
        {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}
impl Decodable for Stat {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let claimed_size: u16 = Decodable::decode(r)?;
        let stat = Stat {
            typ: Decodable::decode(r)?,
            dev: Decodable::decode(r)?,
            qid: Decodable::decode(r)?,
            mode: Decodable::decode(r)?,
            atime: Decodable::decode(r)?,
            mtime: Decodable::decode(r)?,
            length: Decodable::decode(r)?,
            name: Decodable::decode(r)?,
            uid: Decodable::decode(r)?,
            gid: Decodable::decode(r)?,
            muid: Decodable::decode(r)?,
        };
        if stat.body_size() != claimed_size {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "bad message"));
        }
        Ok(stat)
    }
}

impl Encodable for Vec<u8> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        let size = self.len();
        let bytes = (size as u32).encode(w)? + size;
        w.write_all(self)?;
        Ok(bytes)
    }
}
impl Decodable for Vec<u8> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u32 = Decodable::decode(r)?;
        read_exact(r, len as usize)
    }
}

impl Encodable for Vec<String> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match self.iter().fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s) {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}
impl Decodable for Vec<String> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let mut buf = Vec::with_capacity(len as usize);
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

impl Encodable for Vec<QId> {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        match self.iter().fold(Encoder::new(w) << &(self.len() as u16), |acc, s| acc << s) {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}
impl Decodable for Vec<QId> {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        let len: u16 = Decodable::decode(r)?;
        let mut buf = Vec::with_capacity(len as usize);
        for _ in 0..len {
            buf.push(Decodable::decode(r)?);
        }
        Ok(buf)
    }
}

impl Encodable for Msg {
    fn encode<W: WriteBytesExt>(&self, w: &mut W) -> Result<usize> {
        use crate::fcall::FCall::*;

        let typ = MsgType::from(&self.body);
        let buf = Encoder::new(w) << &(typ as u8) << &self.tag;

        let buf = match self.body {
            Tversion { ref msize, ref version } => buf << msize << version,
            Rversion { ref msize, ref version } => buf << msize << version,

            Tauth { ref afid, ref uname, ref aname } => buf << afid << uname << aname,
            Rauth { ref aqid } => buf << aqid,

            Tattach { ref fid, ref afid, ref uname, ref aname } => buf << fid << afid << uname << aname,
            Rattach { ref qid } => buf << qid,

            Rerror { ref ename } => buf << ename,

            Tflush { ref oldtag } => buf << oldtag,
            Rflush => buf,

            Twalk { ref fid, ref newfid, ref wnames } => buf << fid << newfid << wnames,
            Rwalk { ref wqids } => buf << wqids,

            Topen { ref fid, ref mode } => buf << fid << &mode.bits(),
            Ropen { ref qid, ref iounit } => buf << qid << iounit,

            Tcreate { ref fid, ref name, ref perm, ref mode } => buf << fid << name << perm << &mode.bits(),
            Rcreate { ref qid, ref iounit } => buf << qid << iounit,

            Tread { ref fid, ref offset, ref count } => buf << fid << offset << count,
            Rread { ref data } => buf << data,

            Twrite { ref fid, ref offset, ref data } => buf << fid << offset << data,
            Rwrite { ref count } => buf << count,

            Tclunk { ref fid } => buf << fid,
            Rclunk => buf,

            Tremove { ref fid } => buf << fid,
            Rremove => buf,

            Tstat { ref fid } => buf << fid,
            Rstat { ref stat } => buf << stat,

            Twstat { ref fid, ref stat } => buf << fid << stat,
            Rwstat => buf,
        };

        match buf {
            SResult(Ok(enc)) => Ok(enc.bytes_written()),
            SResult(Err(e)) => Err(e),
        }
    }
}

impl Decodable for Msg {
    fn decode<R: ReadBytesExt>(r: &mut R) -> Result<Self> {
        use crate::fcall::MsgType::*;

        let mut buf = r;

        let msg_type = MsgType::from_u8(decode!(buf));
        let tag = decode!(buf);
        let body = match msg_type {
            Some(Tversion) => FCall::Tversion { msize: decode!(buf), version: decode!(buf) },
            Some(Rversion) => FCall::Rversion { msize: decode!(buf), version: decode!(buf) },

            Some(Tauth) => FCall::Tauth { afid: decode!(buf), uname: decode!(buf), aname: decode!(buf) },
            Some(Rauth) => FCall::Rauth { aqid: decode!(buf) },

            Some(Tattach) => FCall::Tattach {
                fid: decode!(buf),
                afid: decode!(buf),
                uname: decode!(buf),
                aname: decode!(buf),
            },
            Some(Rattach) => FCall::Rattach { qid: decode!(buf) },

            Some(Rerror) => FCall::Rerror { ename: decode!(buf) },

            Some(Tflush) => FCall::Tflush { oldtag: decode!(buf) },
            Some(Rflush) => FCall::Rflush,

            Some(Twalk) => FCall::Twalk { fid: decode!(buf), newfid: decode!(buf), wnames: decode!(buf) },
            Some(Rwalk) => FCall::Rwalk { wqids: decode!(buf) },

            Some(Topen) => FCall::Topen { fid: decode!(buf), mode: decode!(OpenMode, buf) },
            Some(Ropen) => FCall::Ropen { qid: decode!(buf), iounit: decode!(buf) },

            Some(Tcreate) => FCall::Tcreate {
                fid: decode!(buf),
                name: decode!(buf),
                perm: decode!(buf),
                mode: decode!(OpenMode, buf),
            },
            Some(Rcreate) => FCall::Rcreate { qid: decode!(buf), iounit: decode!(buf) },

            Some(Tread) => FCall::Tread { fid: decode!(buf), offset: decode!(buf), count: decode!(buf) },
            Some(Rread) => FCall::Rread { data: decode!(buf) },

            Some(Twrite) => FCall::Twrite { fid: decode!(buf), offset: decode!(buf), data: decode!(buf) },
            Some(Rwrite) => FCall::Rwrite { count: decode!(buf) },

            Some(Tclunk) => FCall::Tclunk { fid: decode!(buf) },
            Some(Rclunk) => FCall::Rclunk,

            Some(Tremove) => FCall::Tremove { fid: decode!(buf) },
            Some(Rremove) => FCall::Rremove,

            Some(Tstat) => FCall::Tstat { fid: decode!(buf) },
            Some(Rstat) => FCall::Rstat { stat: decode!(buf) },

            Some(Twstat) => FCall::Twstat { fid: decode!(buf), stat: decode!(buf) },
            Some(Rwstat) => FCall::Rwstat,

            None => {
                return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "unknown message type"));
            }
        };

        Ok(Msg { tag, body })
    }
}

/// Read one `type[1] tag[2] body` message from a byte-oriented stream.
pub fn read_msg<R: ReadBytesExt>(r: &mut R) -> Result<Msg> {
    Decodable::decode(r)
}

/// Write one `type[1] tag[2] body` message into a byte-oriented stream.
pub fn write_msg<W: WriteBytesExt>(w: &mut W, msg: &Msg) -> Result<usize> {
    msg.encode(w)
}

#[test]
fn encoder_test1() {
    let expected: Vec<u8> = (0..10).collect();
    let mut encoder = Vec::new();
    for i in 0..10 {
        (&(i as u8)).encode(&mut encoder).unwrap();
    }
    assert_eq!(expected, encoder);
}

#[test]
fn decoder_test1() {
    use std::io::Cursor;

    let expected: Vec<u8> = (0..10).collect();
    let mut decoder = Cursor::new(expected.clone());
    let mut actual: Vec<u8> = Vec::new();
    loop {
        match u8::decode(&mut decoder) {
            Ok(i) => actual.push(i),
            Err(_) => break,
        }
    }
    assert_eq!(expected, actual);
}

#[test]
fn msg_encode_decode_rversion() {
    use std::io::Cursor;

    let expected = Msg {
        tag: 0xdead,
        body: FCall::Rversion { msize: 4096, version: P92000.to_owned() },
    };
    let mut buf = Vec::new();
    write_msg(&mut buf, &expected).unwrap();

    let mut readbuf = Cursor::new(buf);
    let actual = read_msg(&mut readbuf).unwrap();

    assert_eq!(expected, actual);
}

#[test]
fn msg_encode_decode_twalk() {
    use std::io::Cursor;

    let expected = Msg {
        tag: 2,
        body: FCall::Twalk {
            fid: 0,
            newfid: 1,
            wnames: vec!["a".to_owned(), "b".to_owned(), "c".to_owned()],
        },
    };
    let mut buf = Vec::new();
    write_msg(&mut buf, &expected).unwrap();

    let mut readbuf = Cursor::new(buf);
    let actual = read_msg(&mut readbuf).unwrap();

    assert_eq!(expected, actual);
}

#[test]
fn stat_round_trips_with_correct_body_size() {
    use std::io::Cursor;

    let stat = Stat {
        typ: 0,
        dev: 0,
        qid: QId { typ: QidType::FILE, version: 1, path: 7 },
        mode: 0o644,
        atime: 0,
        mtime: 0,
        length: 3,
        name: "hello.txt".to_owned(),
        uid: "glenda".to_owned(),
        gid: "glenda".to_owned(),
        muid: "glenda".to_owned(),
    };

    let mut buf = Vec::new();
    stat.encode(&mut buf).unwrap();

    let encoded_size = u16::from_le_bytes([buf[0], buf[1]]);
    assert_eq!(encoded_size as usize, buf.len() - 2);

    let mut readbuf = Cursor::new(buf);
    let decoded = Stat::decode(&mut readbuf).unwrap();
    assert_eq!(decoded, stat);
}
