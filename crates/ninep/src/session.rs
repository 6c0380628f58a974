//! The per-connection session state machine.
//!
//! One session runs one request at a time to completion — no operation is
//! ever interleaved with another on the same session. That single fact is
//! what makes `Tflush` a no-op and removes every need for a lock inside
//! [`crate::fid::FidTable`]/[`crate::tag::TagTable`]: by the time a flush
//! reaches here, the request it names has already finished.

use std::sync::Arc;

use log::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, ErrorKind};
use crate::fcall::{
    FCall, MsgType, Msg, OpenMode, Stat, IOHDRSZ, MAXWELEM, MSIZE_MIN, NOFID, P92000, VERSION_UNKNOWN,
};
use crate::fid::FidTable;
use crate::fs::Filesystem;
use crate::serialize;
use crate::tag::TagTable;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingVersion,
    AwaitingAttach,
    Serving,
    Closing,
}

/// Recover the tag from a frame whose body failed to decode. A frame holds
/// at least `type[1] tag[2]` before the type-specific body, so any frame of
/// 3 bytes or more has an address to reply to even when what follows is
/// garbage.
fn recover_tag(frame: &[u8]) -> Option<u16> {
    let tag_bytes: [u8; 2] = frame.get(1..3)?.try_into().ok()?;
    Some(u16::from_le_bytes(tag_bytes))
}

/// Per-fid bookkeeping for a directory read cursor (Open Question 3): a
/// re-read is valid only at `0` or at the cumulative byte count this session
/// has already handed back for that fid.
#[derive(Default, Clone, Copy)]
struct DirCursor {
    bytes_served: u64,
    entries_served: usize,
}

/// A single client connection: its own fid/tag tables, negotiated
/// parameters, and a non-owning reference to the shared backend.
pub struct Session<Fs: Filesystem> {
    transport: Box<dyn Transport>,
    fs: Arc<Fs>,
    fids: FidTable<Fs::Handle>,
    tags: TagTable,
    dir_cursors: std::collections::HashMap<u32, DirCursor>,
    config: Config,
    state: State,
    msize: u32,
    auth_fid: Option<u32>,
}

impl<Fs: Filesystem + 'static> Session<Fs> {
    pub fn new(transport: Box<dyn Transport>, fs: Arc<Fs>, config: Config) -> Self {
        let max_fids = config.max_fids;
        let max_tags = config.max_tags;
        Session {
            transport,
            fs,
            fids: FidTable::new(max_fids),
            tags: TagTable::new(max_tags),
            dir_cursors: std::collections::HashMap::new(),
            config,
            state: State::AwaitingVersion,
            msize: MSIZE_MIN,
            auth_fid: None,
        }
    }

    /// Run until the transport disconnects or reports an I/O error.
    pub async fn serve(&mut self) -> Result<(), Error> {
        loop {
            let frame = match self.transport.recv().await {
                Ok(Some(f)) => f,
                Ok(None) => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let msg = match serialize::read_msg(&mut &frame[..]) {
                Ok(msg) => msg,
                Err(_) => {
                    // `type[1] tag[2]` is recoverable even when the body past
                    // it is garbage; only a frame too short to carry even
                    // that much has no address to reply to.
                    let Some(tag) = recover_tag(&frame) else {
                        warn!("dropping unparseable frame ({} bytes)", frame.len());
                        continue;
                    };
                    warn!("malformed body on tag {}: replying Rerror", tag);
                    self.send_reply(tag, FCall::Rerror { ename: ErrorKind::MalformedMessage.message().to_owned() }).await?;
                    continue;
                }
            };

            info!("<- {:?}", msg);
            if let Some(body) = self.dispatch_one(msg.tag, msg.body).await {
                self.send_reply(msg.tag, body).await?;
            }
        }
    }

    async fn send_reply(&mut self, tag: u16, body: FCall) -> Result<(), Error> {
        let reply = Msg { tag, body };
        info!("-> {:?}", reply);
        let mut buf = Vec::new();
        serialize::write_msg(&mut buf, &reply)?;
        self.transport.send(&buf).await?;
        Ok(())
    }

    fn reset(&mut self) {
        self.fids.clear();
        self.tags.clear();
        self.dir_cursors.clear();
        self.auth_fid = None;
        self.msize = MSIZE_MIN;
    }

    /// Run one request to completion and produce the reply body, or `None`
    /// if nothing should be sent (never the case for 9P2000, kept for
    /// symmetry with transports that might legitimately drop a reply).
    async fn dispatch_one(&mut self, tag: u16, req: FCall) -> Option<FCall> {
        let msg_type = MsgType::from(&req);

        // Tversion resets an already-running session rather than being
        // rejected by it.
        if let FCall::Tversion { .. } = req {
            if self.state != State::AwaitingVersion {
                self.reset();
                self.state = State::AwaitingAttach;
            }
            return Some(self.handle_version(req));
        }

        if self.state == State::AwaitingVersion {
            return Some(FCall::Rerror { ename: ErrorKind::BadVersionOrder.message().to_owned() });
        }

        if let FCall::Tflush { .. } = req {
            // Serial dispatch means whatever this flush names has already
            // finished by the time we see it.
            return Some(FCall::Rflush);
        }

        let result = self.handle(tag, req).await;
        match result {
            Ok(body) => Some(body),
            Err(e) => {
                error!("{:?}: {}", msg_type, e);
                Some(FCall::Rerror { ename: e.wire_message() })
            }
        }
    }

    fn handle_version(&mut self, req: FCall) -> FCall {
        let FCall::Tversion { msize, version } = req else { unreachable!() };

        let negotiated = msize.min(self.config.max_message_size).max(MSIZE_MIN);
        self.msize = negotiated;
        self.state = State::AwaitingAttach;

        let version = if version == self.config.version_string { self.config.version_string.clone() } else { VERSION_UNKNOWN.to_owned() };
        FCall::Rversion { msize: negotiated, version }
    }

    async fn handle(&mut self, tag: u16, req: FCall) -> Result<FCall, Error> {
        match req {
            FCall::Tauth { afid, .. } => self.handle_auth(afid).await,
            FCall::Tattach { fid, afid, uname, aname } => self.handle_attach(fid, afid, uname, aname).await,
            FCall::Twalk { fid, newfid, wnames } => self.handle_walk(fid, newfid, wnames).await,
            FCall::Topen { fid, mode } => self.handle_open(fid, mode).await,
            FCall::Tcreate { fid, name, perm, mode } => self.handle_create(fid, name, perm, mode).await,
            FCall::Tread { fid, offset, count } => self.handle_read(fid, offset, count).await,
            FCall::Twrite { fid, offset, data } => self.handle_write(fid, offset, data).await,
            FCall::Tclunk { fid } => self.handle_clunk(fid).await,
            FCall::Tremove { fid } => self.handle_remove(fid).await,
            FCall::Tstat { fid } => self.handle_stat(fid).await,
            FCall::Twstat { fid, stat } => self.handle_wstat(fid, stat).await,
            other => {
                let _ = tag;
                warn!("unexpected message in Serving state: {:?}", MsgType::from(&other));
                Err(ErrorKind::UnknownType.into())
            }
        }
    }

    async fn handle_auth(&mut self, afid: u32) -> Result<FCall, Error> {
        if !self.config.auth_required {
            return Err(ErrorKind::AuthNotRequired.into());
        }
        if self.fids.contains(afid) {
            return Err(ErrorKind::FidInUse.into());
        }
        // Beyond binding the afid to whatever node the backend hands back,
        // the handshake itself (what gets read/written against it) is
        // backend-specific and outside this state machine (Open Question 2).
        let (handle, qid) = self.fs.auth_root().await?;
        self.fids.alloc(afid, qid, handle)?;
        Ok(FCall::Rauth { aqid: qid })
    }

    async fn handle_attach(&mut self, fid: u32, afid: u32, uname: String, aname: String) -> Result<FCall, Error> {
        let _ = (uname, aname);
        if self.config.auth_required {
            if afid == NOFID || !self.fids.contains(afid) {
                return Err(ErrorKind::AuthRequired.into());
            }
        }
        if self.fids.contains(fid) {
            return Err(ErrorKind::FidInUse.into());
        }
        let (handle, qid) = self.fs.root().await?;
        self.fids.alloc(fid, qid, handle)?;
        self.state = State::Serving;
        Ok(FCall::Rattach { qid })
    }

    async fn handle_walk(&mut self, fid: u32, newfid: u32, wnames: Vec<String>) -> Result<FCall, Error> {
        if wnames.len() > MAXWELEM {
            return Err(ErrorKind::WalkTooLong.into());
        }
        for name in &wnames {
            if name.is_empty() || name.contains('/') {
                return Err(ErrorKind::BadName.into());
            }
        }

        let start = self.fids.lookup(fid)?;
        let mut handle = start.handle.clone();
        let mut qid = start.qid;
        let mut qids = Vec::with_capacity(wnames.len());

        for name in &wnames {
            match self.fs.walk(&handle, name).await {
                Ok((h, q)) => {
                    handle = h;
                    qid = q;
                    qids.push(q);
                }
                Err(_) if !qids.is_empty() => break,
                Err(e) => return Err(e),
            }
        }

        if qids.len() == wnames.len() {
            if newfid != fid {
                if self.fids.contains(newfid) {
                    return Err(ErrorKind::FidInUse.into());
                }
                self.fids.alloc(newfid, qid, handle)?;
            } else {
                let entry = self.fids.lookup_mut(fid)?;
                entry.qid = qid;
                entry.handle = handle;
            }
        }

        Ok(FCall::Rwalk { wqids: qids })
    }

    async fn handle_open(&mut self, fid: u32, mode: OpenMode) -> Result<FCall, Error> {
        let is_dir = {
            let entry = self.fids.lookup(fid)?;
            if entry.is_open() {
                return Err(ErrorKind::AlreadyOpen.into());
            }
            self.fs.is_dir(&entry.handle).await?
        };
        if is_dir && mode.is_write_access() {
            return Err(ErrorKind::IsDir.into());
        }

        let qid = {
            let entry = self.fids.lookup(fid)?;
            self.fs.open(&entry.handle, mode).await?;
            entry.qid
        };

        let entry = self.fids.lookup_mut(fid)?;
        entry.open_mode = Some(mode);
        entry.offset = 0;
        self.dir_cursors.remove(&fid);

        Ok(FCall::Ropen { qid, iounit: self.iounit() })
    }

    async fn handle_create(&mut self, fid: u32, name: String, perm: u32, mode: OpenMode) -> Result<FCall, Error> {
        if name.is_empty() || name.contains('/') {
            return Err(ErrorKind::BadName.into());
        }
        {
            let entry = self.fids.lookup(fid)?;
            if entry.is_open() {
                return Err(ErrorKind::AlreadyOpen.into());
            }
            if !self.fs.is_dir(&entry.handle).await? {
                return Err(ErrorKind::NotDir.into());
            }
        }

        let parent_handle = self.fids.lookup(fid)?.handle.clone();
        let (handle, qid) = self.fs.create(&parent_handle, &name, perm, mode).await?;
        self.fs.open(&handle, mode).await?;

        let entry = self.fids.lookup_mut(fid)?;
        entry.handle = handle;
        entry.qid = qid;
        entry.open_mode = Some(mode);
        entry.offset = 0;

        Ok(FCall::Rcreate { qid, iounit: self.iounit() })
    }

    async fn handle_read(&mut self, fid: u32, offset: u64, count: u32) -> Result<FCall, Error> {
        let count = count.min(self.msize.saturating_sub(IOHDRSZ)).min(self.iounit().max(1));

        let (handle, is_dir) = {
            let entry = self.fids.lookup(fid)?;
            if !entry.is_open() {
                return Err(ErrorKind::BadOpenMode.into());
            }
            (entry.handle.clone(), self.fs.is_dir(&entry.handle).await?)
        };

        if is_dir {
            return self.handle_readdir(fid, &handle, offset, count).await;
        }

        let mut buf = vec![0u8; count as usize];
        let n = self.fs.read(&handle, offset, &mut buf).await?;
        buf.truncate(n as usize);
        Ok(FCall::Rread { data: buf })
    }

    async fn handle_readdir(&mut self, fid: u32, handle: &Fs::Handle, offset: u64, count: u32) -> Result<FCall, Error> {
        let cursor = self.dir_cursors.entry(fid).or_default();

        if offset == 0 {
            *cursor = DirCursor::default();
        } else if offset != cursor.bytes_served {
            return Err(ErrorKind::BadDirOffset.into());
        }

        let mut data = Vec::new();
        let mut served = 0usize;
        loop {
            let batch = self.fs.readdir(handle, cursor.entries_served + served, 1).await?;
            let Some(stat) = batch.into_iter().next() else { break };
            let mut encoded = Vec::new();
            {
                use crate::serialize::Encodable;
                stat.encode(&mut encoded).map_err(|_| ErrorKind::MalformedMessage)?;
            }
            if data.len() + encoded.len() > count as usize {
                break;
            }
            data.extend_from_slice(&encoded);
            served += 1;
        }

        let cursor = self.dir_cursors.get_mut(&fid).expect("inserted above");
        cursor.entries_served += served;
        cursor.bytes_served += data.len() as u64;

        Ok(FCall::Rread { data })
    }

    async fn handle_write(&mut self, fid: u32, offset: u64, data: Vec<u8>) -> Result<FCall, Error> {
        let handle = {
            let entry = self.fids.lookup(fid)?;
            if !entry.is_open() || !entry.open_mode.unwrap().is_write_access() {
                return Err(ErrorKind::BadOpenMode.into());
            }
            entry.handle.clone()
        };
        let n = self.fs.write(&handle, offset, &data).await?;
        Ok(FCall::Rwrite { count: n })
    }

    async fn handle_clunk(&mut self, fid: u32) -> Result<FCall, Error> {
        let entry = self.fids.free(fid)?;
        self.dir_cursors.remove(&fid);

        if let Err(e) = self.fs.clunk(&entry.handle).await {
            warn!("backend clunk error for fid {}: {} (swallowed, Rclunk still sent)", fid, e);
        }

        if entry.open_mode.map(|m| m.remove_on_close()).unwrap_or(false) {
            if let Err(e) = self.fs.remove(&entry.handle).await {
                warn!("remove-on-close failed for fid {}: {}", fid, e);
            }
        }

        Ok(FCall::Rclunk)
    }

    async fn handle_remove(&mut self, fid: u32) -> Result<FCall, Error> {
        let entry = self.fids.free(fid)?;
        self.dir_cursors.remove(&fid);
        self.fs.remove(&entry.handle).await?;
        Ok(FCall::Rremove)
    }

    async fn handle_stat(&mut self, fid: u32) -> Result<FCall, Error> {
        let handle = self.fids.lookup(fid)?.handle.clone();
        let stat = self.fs.stat(&handle).await?;
        Ok(FCall::Rstat { stat })
    }

    async fn handle_wstat(&mut self, fid: u32, stat: Stat) -> Result<FCall, Error> {
        let handle = self.fids.lookup(fid)?.handle.clone();
        self.fs.wstat(&handle, &stat).await?;
        Ok(FCall::Rwstat)
    }

    fn iounit(&self) -> u32 {
        self.msize.saturating_sub(24)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use ninep_ramfs::RamFs;

    /// Drives a `Session` over an in-process duplex pipe the way a real
    /// client would, without pulling in the wire-framing helpers the
    /// `tests/scenarios.rs` integration suite uses — these tests go straight
    /// at `dispatch_one` through the transport's `send`/`recv` contract.
    struct Harness {
        session: Session<RamFs>,
    }

    impl Harness {
        fn new(fs: Arc<RamFs>, config: Config) -> Self {
            let (_client, server) = tokio::io::duplex(8192);
            let (r, w) = tokio::io::split(server);
            let transport = Box::new(StreamTransport::new(r, w, config.max_message_size as usize));
            Harness { session: Session::new(transport, fs, config) }
        }

        async fn call(&mut self, tag: u16, req: FCall) -> FCall {
            self.session.dispatch_one(tag, req).await.expect("every request produces a reply")
        }
    }

    #[tokio::test]
    async fn negotiated_msize_is_clamped_to_server_cap_and_floor() {
        let mut h = Harness::new(Arc::new(RamFs::new()), Config { max_message_size: 4096, ..Config::default() });

        let reply = h.call(0xFFFF, FCall::Tversion { msize: 65536, version: P92000.to_owned() }).await;
        assert_eq!(reply, FCall::Rversion { msize: 4096, version: P92000.to_owned() });

        let mut h = Harness::new(Arc::new(RamFs::new()), Config::default());
        let reply = h.call(0xFFFF, FCall::Tversion { msize: 1, version: P92000.to_owned() }).await;
        assert_eq!(reply, FCall::Rversion { msize: MSIZE_MIN, version: P92000.to_owned() });
    }

    #[tokio::test]
    async fn unrecognized_version_string_reports_unknown() {
        let mut h = Harness::new(Arc::new(RamFs::new()), Config::default());
        let reply = h.call(0xFFFF, FCall::Tversion { msize: 8192, version: "9P3000".to_owned() }).await;
        assert_eq!(reply, FCall::Rversion { msize: 8192, version: VERSION_UNKNOWN.to_owned() });
    }

    #[tokio::test]
    async fn requests_before_version_are_rejected() {
        let mut h = Harness::new(Arc::new(RamFs::new()), Config::default());
        let reply = h.call(1, FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() }).await;
        assert_eq!(reply, FCall::Rerror { ename: ErrorKind::BadVersionOrder.message().to_owned() });
    }

    #[tokio::test]
    async fn walk_with_no_names_duplicates_the_fid() {
        let fs = Arc::new(RamFs::new());
        let mut h = Harness::new(fs, Config::default());
        h.call(0xFFFF, FCall::Tversion { msize: 8192, version: P92000.to_owned() }).await;
        h.call(1, FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() }).await;

        let reply = h.call(2, FCall::Twalk { fid: 0, newfid: 1, wnames: vec![] }).await;
        assert_eq!(reply, FCall::Rwalk { wqids: vec![] });

        // fid 1 now names the same file as fid 0: stat-ing it must succeed.
        let stat = h.call(3, FCall::Tstat { fid: 1 }).await;
        assert!(matches!(stat, FCall::Rstat { .. }));
    }

    #[tokio::test]
    async fn walk_beyond_max_welem_fails_without_touching_fids() {
        let fs = Arc::new(RamFs::new());
        let mut h = Harness::new(fs, Config::default());
        h.call(0xFFFF, FCall::Tversion { msize: 8192, version: P92000.to_owned() }).await;
        h.call(1, FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() }).await;

        let names = (0..(MAXWELEM + 1)).map(|i| format!("n{i}")).collect();
        let reply = h.call(2, FCall::Twalk { fid: 0, newfid: 9, wnames: names }).await;
        assert_eq!(reply, FCall::Rerror { ename: ErrorKind::WalkTooLong.message().to_owned() });

        let stat = h.call(3, FCall::Tstat { fid: 9 }).await;
        assert_eq!(stat, FCall::Rerror { ename: ErrorKind::UnknownFid.message().to_owned() });
    }

    #[tokio::test]
    async fn directory_read_at_mid_record_offset_fails() {
        let fs = RamFs::new();
        {
            let (root, _) = fs.root().await.unwrap();
            fs.create_file(&root, "a", vec![]).unwrap();
            fs.create_file(&root, "b", vec![]).unwrap();
        }
        let mut h = Harness::new(Arc::new(fs), Config::default());
        h.call(0xFFFF, FCall::Tversion { msize: 8192, version: P92000.to_owned() }).await;
        h.call(1, FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() }).await;
        h.call(2, FCall::Topen { fid: 0, mode: OpenMode::READ }).await;

        let first = h.call(3, FCall::Tread { fid: 0, offset: 0, count: 8192 }).await;
        let FCall::Rread { data } = first else { panic!("expected Rread") };
        assert!(!data.is_empty());

        let reply = h.call(4, FCall::Tread { fid: 0, offset: 1, count: 8192 }).await;
        assert_eq!(reply, FCall::Rerror { ename: ErrorKind::BadDirOffset.message().to_owned() });
    }

    #[tokio::test]
    async fn tversion_mid_session_resets_fids_and_tags() {
        let fs = Arc::new(RamFs::new());
        let mut h = Harness::new(fs, Config::default());
        h.call(0xFFFF, FCall::Tversion { msize: 8192, version: P92000.to_owned() }).await;
        h.call(1, FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() }).await;

        h.call(0xFFFF, FCall::Tversion { msize: 8192, version: P92000.to_owned() }).await;

        let reply = h.call(2, FCall::Tstat { fid: 0 }).await;
        assert_eq!(reply, FCall::Rerror { ename: ErrorKind::UnknownFid.message().to_owned() });
    }

    #[test]
    fn recover_tag_reads_the_two_bytes_after_type() {
        // type[1] tag[2] = [0x64, 0x02, 0x00] followed by whatever garbage body.
        let frame = [100u8, 0x02, 0x00, 0xff, 0xff];
        assert_eq!(recover_tag(&frame), Some(2));
    }

    #[test]
    fn recover_tag_fails_on_a_frame_shorter_than_three_bytes() {
        assert_eq!(recover_tag(&[100u8, 0x02]), None);
        assert_eq!(recover_tag(&[]), None);
    }

    #[tokio::test]
    async fn malformed_body_on_a_recoverable_tag_replies_rerror_over_the_wire() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut client, server) = tokio::io::duplex(8192);
        let (r, w) = tokio::io::split(server);
        let transport = Box::new(StreamTransport::new(r, w, Config::default().max_message_size as usize));
        let mut session = Session::new(transport, Arc::new(RamFs::new()), Config::default());
        tokio::spawn(async move {
            let _ = session.serve().await;
        });

        // A Tversion (type 100) with tag 7 and a string-length field claiming
        // far more bytes than actually follow: a well-formed header, a
        // garbage body.
        let tag: u16 = 7;
        let mut body = vec![100u8];
        body.extend_from_slice(&tag.to_le_bytes());
        body.extend_from_slice(&8192u32.to_le_bytes()); // msize
        body.extend_from_slice(&0xFFFFu16.to_le_bytes()); // claimed string length, way too long
        body.extend_from_slice(b"9P"); // far fewer bytes than claimed

        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        client.write_all(&frame).await.unwrap();

        let mut len_buf = [0u8; 4];
        client.read_exact(&mut len_buf).await.unwrap();
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut reply_body = vec![0u8; len - 4];
        client.read_exact(&mut reply_body).await.unwrap();
        let reply = serialize::read_msg(&mut &reply_body[..]).unwrap();

        assert_eq!(reply.tag, tag);
        assert_eq!(reply.body, FCall::Rerror { ename: ErrorKind::MalformedMessage.message().to_owned() });
    }
}
