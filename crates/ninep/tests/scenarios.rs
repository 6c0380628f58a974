//! End-to-end scenarios from the protocol scenarios: each drives a
//! [`Session`] wired to an in-memory [`RamFs`] over a real duplex
//! [`StreamTransport`], asserting on the decoded [`FCall`]s a client would
//! see on the wire (the exact framing/codec a client actually speaks, not
//! just the session's internal dispatch).

use std::sync::Arc;

use ninep::config::Config;
use ninep::fcall::{FCall, Msg, NOFID, OpenMode, P92000};
use ninep::fs::Filesystem;
use ninep::serialize;
use ninep::session::Session;
use ninep::transport::StreamTransport;
use ninep_ramfs::RamFs;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Frame and send one message the way a real 9P client would: `size[4]`
/// (counting itself) followed by `type[1] tag[2] body`.
async fn send(stream: &mut DuplexStream, msg: &Msg) {
    let mut body = Vec::new();
    serialize::write_msg(&mut body, msg).unwrap();
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&((body.len() + 4) as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    stream.write_all(&frame).await.unwrap();
}

/// Read one complete frame back and decode it.
async fn recv(stream: &mut DuplexStream) -> Msg {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.unwrap();
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    serialize::read_msg(&mut &body[..]).unwrap()
}

/// Spawn a session over one half of a duplex pipe, returning the other half
/// for the test to drive as a client.
fn spawn_session(fs: Arc<RamFs>, config: Config) -> DuplexStream {
    let (client, server) = tokio::io::duplex(8192);
    let (r, w) = tokio::io::split(server);
    let transport = Box::new(StreamTransport::new(r, w, config.max_message_size as usize));
    let mut session = Session::new(transport, fs, config);
    tokio::spawn(async move {
        let _ = session.serve().await;
    });
    client
}

async fn version(client: &mut DuplexStream, msize: u32) -> Msg {
    send(client, &Msg { tag: 0xFFFF, body: FCall::Tversion { msize, version: P92000.to_owned() } }).await;
    recv(client).await
}

#[tokio::test]
async fn scenario_1_version_negotiates_server_cap() {
    let fs = Arc::new(RamFs::new());
    let config = Config { max_message_size: 4096, ..Config::default() };
    let mut client = spawn_session(fs, config);

    let reply = version(&mut client, 8192).await;
    assert_eq!(reply.tag, 0xFFFF);
    assert_eq!(reply.body, FCall::Rversion { msize: 4096, version: P92000.to_owned() });
}

#[tokio::test]
async fn scenario_2_attach_walk_open_read_clunk() {
    let fs = RamFs::new();
    {
        let (root, _) = fs.root().await.unwrap();
        fs.create_file(&root, "hello.txt", b"hi\n".to_vec()).unwrap();
    }
    let fs = Arc::new(fs);
    let config = Config::default();
    let mut client = spawn_session(fs, config.clone());
    version(&mut client, config.max_message_size).await;

    send(&mut client, &Msg { tag: 1, body: FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() } }).await;
    let attach = recv(&mut client).await;
    let FCall::Rattach { qid: root_qid } = attach.body else { panic!("expected Rattach, got {:?}", attach.body) };
    assert!(root_qid.typ.contains(ninep::fcall::QidType::DIR));

    send(&mut client, &Msg { tag: 2, body: FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["hello.txt".into()] } }).await;
    let walk = recv(&mut client).await;
    let FCall::Rwalk { wqids } = walk.body else { panic!("expected Rwalk, got {:?}", walk.body) };
    assert_eq!(wqids.len(), 1);
    let file_qid = wqids[0];
    assert!(!file_qid.typ.contains(ninep::fcall::QidType::DIR));

    send(&mut client, &Msg { tag: 3, body: FCall::Topen { fid: 1, mode: OpenMode::READ } }).await;
    let open = recv(&mut client).await;
    let FCall::Ropen { qid, iounit } = open.body else { panic!("expected Ropen, got {:?}", open.body) };
    assert_eq!(qid, file_qid);
    assert!(iounit <= config.max_message_size - 24);

    send(&mut client, &Msg { tag: 4, body: FCall::Tread { fid: 1, offset: 0, count: 100 } }).await;
    let read = recv(&mut client).await;
    assert_eq!(read.body, FCall::Rread { data: b"hi\n".to_vec() });

    send(&mut client, &Msg { tag: 5, body: FCall::Tclunk { fid: 1 } }).await;
    let clunk = recv(&mut client).await;
    assert_eq!(clunk.body, FCall::Rclunk);
}

#[tokio::test]
async fn scenario_3_walk_fails_partway_leaves_newfid_unbound() {
    let fs = RamFs::new();
    {
        let (root, _) = fs.root().await.unwrap();
        fs.create_dir(&root, "a").unwrap();
        let (dir_a, _) = fs.walk(&root, "a").await.unwrap();
        fs.create_file(&dir_a, "b", vec![]).unwrap();
    }
    let fs = Arc::new(fs);
    let config = Config::default();
    let mut client = spawn_session(fs, config.clone());
    version(&mut client, config.max_message_size).await;
    send(&mut client, &Msg { tag: 1, body: FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() } }).await;
    recv(&mut client).await;

    send(
        &mut client,
        &Msg { tag: 2, body: FCall::Twalk { fid: 0, newfid: 2, wnames: vec!["a".into(), "b".into(), "c".into()] } },
    )
    .await;
    let walk = recv(&mut client).await;
    let FCall::Rwalk { wqids } = walk.body else { panic!("expected Rwalk, got {:?}", walk.body) };
    assert_eq!(wqids.len(), 2, "only the two successful components should be reported");

    send(&mut client, &Msg { tag: 3, body: FCall::Topen { fid: 2, mode: OpenMode::READ } }).await;
    let open = recv(&mut client).await;
    assert_eq!(open.body, FCall::Rerror { ename: "unknown fid".into() });
}

#[tokio::test]
async fn scenario_4_duplicate_attach_fid_is_rejected() {
    let fs = Arc::new(RamFs::new());
    let config = Config::default();
    let mut client = spawn_session(fs, config.clone());
    version(&mut client, config.max_message_size).await;

    send(&mut client, &Msg { tag: 1, body: FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() } }).await;
    recv(&mut client).await;

    send(&mut client, &Msg { tag: 2, body: FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() } }).await;
    let second = recv(&mut client).await;
    assert_eq!(second.body, FCall::Rerror { ename: "fid in use".into() });
}

#[tokio::test]
async fn scenario_5_flush_is_acknowledged_and_has_no_effect() {
    let fs = RamFs::new();
    {
        let (root, _) = fs.root().await.unwrap();
        fs.create_file(&root, "hello.txt", b"hi\n".to_vec()).unwrap();
    }
    let fs = Arc::new(fs);
    let config = Config::default();
    let mut client = spawn_session(fs, config.clone());
    version(&mut client, config.max_message_size).await;
    send(&mut client, &Msg { tag: 1, body: FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() } }).await;
    recv(&mut client).await;
    send(&mut client, &Msg { tag: 2, body: FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["hello.txt".into()] } }).await;
    recv(&mut client).await;
    send(&mut client, &Msg { tag: 3, body: FCall::Topen { fid: 1, mode: OpenMode::READ } }).await;
    recv(&mut client).await;

    send(&mut client, &Msg { tag: 10, body: FCall::Tflush { oldtag: 4 } }).await;
    let flush = recv(&mut client).await;
    assert_eq!(flush.body, FCall::Rflush);

    send(&mut client, &Msg { tag: 4, body: FCall::Tread { fid: 1, offset: 0, count: 100 } }).await;
    let read = recv(&mut client).await;
    assert_eq!(read.body, FCall::Rread { data: b"hi\n".to_vec() }, "flush must not have disturbed the pending read");
}

#[tokio::test]
async fn scenario_6_two_sessions_do_not_observe_each_others_fids() {
    let fs = RamFs::new();
    {
        let (root, _) = fs.root().await.unwrap();
        fs.create_dir(&root, "a").unwrap();
        fs.create_dir(&root, "b").unwrap();
    }
    let fs = Arc::new(fs);
    let config = Config::default();

    let mut s1 = spawn_session(fs.clone(), config.clone());
    let mut s2 = spawn_session(fs, config.clone());

    for client in [&mut s1, &mut s2] {
        version(client, config.max_message_size).await;
        send(client, &Msg { tag: 1, body: FCall::Tattach { fid: 0, afid: NOFID, uname: "u".into(), aname: "".into() } }).await;
        recv(client).await;
    }

    send(&mut s1, &Msg { tag: 2, body: FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["a".into()] } }).await;
    let walk1 = recv(&mut s1).await;
    let FCall::Rwalk { wqids: q1 } = walk1.body else { panic!("expected Rwalk") };

    send(&mut s2, &Msg { tag: 2, body: FCall::Twalk { fid: 0, newfid: 1, wnames: vec!["b".into()] } }).await;
    let walk2 = recv(&mut s2).await;
    let FCall::Rwalk { wqids: q2 } = walk2.body else { panic!("expected Rwalk") };

    assert_ne!(q1[0].path, q2[0].path, "the two sessions walked to distinct files");

    send(&mut s1, &Msg { tag: 3, body: FCall::Tstat { fid: 1 } }).await;
    let stat1 = recv(&mut s1).await;
    let FCall::Rstat { stat: st1 } = stat1.body else { panic!("expected Rstat") };
    assert_eq!(st1.qid.path, q1[0].path);

    send(&mut s2, &Msg { tag: 3, body: FCall::Tstat { fid: 1 } }).await;
    let stat2 = recv(&mut s2).await;
    let FCall::Rstat { stat: st2 } = stat2.body else { panic!("expected Rstat") };
    assert_eq!(st2.qid.path, q2[0].path);

    assert_ne!(st1.qid.path, st2.qid.path, "s2 must not observe s1's fid binding and vice versa");
}
