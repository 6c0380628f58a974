//! Demo 9P2000 server: exposes an in-memory [`ninep_ramfs::RamFs`] tree over
//! TCP, the byte-stream transport family described for this framework.
//!
//! Accepts a `proto!address!port` listen string (only `tcp` is supported),
//! seeds a small demo tree, and hands each accepted connection to
//! [`ninep::pool::SessionPool::accept`].

use std::sync::Arc;

use clap::Parser;
use log::{error, info};
use ninep::config::Config;
use ninep::fs::Filesystem;
use ninep::pool::SessionPool;
use ninep::transport::StreamTransport;
use ninep::utils::parse_proto;
use ninep_ramfs::RamFs;

mod utils;
use crate::utils::seed_demo_tree;

#[derive(Debug, clap::Parser)]
struct Cli {
    /// proto!address!port, e.g. "tcp!0.0.0.0!564" (only `tcp` is supported)
    address: String,

    /// Upper bound offered during Tversion negotiation.
    #[arg(long, default_value_t = 8192)]
    max_message_size: u32,

    /// Per-session fid table capacity.
    #[arg(long, default_value_t = 128)]
    max_fids: usize,

    /// Per-session in-flight tag capacity.
    #[arg(long, default_value_t = 64)]
    max_tags: usize,

    /// Session pool slot count (maximum concurrent clients).
    #[arg(long, default_value_t = 16)]
    max_sessions: usize,
}

async fn tcpd_main(cli: Cli) -> std::io::Result<i32> {
    let (proto, addr, port) = parse_proto(&cli.address)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "expected proto!address!port"))?;
    if proto != "tcp" {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "only the tcp protocol is supported"));
    }
    let listen_addr = format!("{addr}:{port}");

    let fs = RamFs::new();
    {
        let (root, _) = fs.root().await.expect("fresh RamFs always has a root");
        seed_demo_tree(&fs, &root);
    }

    let config = Config {
        max_message_size: cli.max_message_size,
        max_fids: cli.max_fids,
        max_tags: cli.max_tags,
        max_sessions: cli.max_sessions,
        ..Config::default()
    };
    config.validate().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let pool = Arc::new(SessionPool::new(Arc::new(fs), config.clone()));
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("Ready to accept clients on {}", listen_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        info!("accepted: {:?}", peer);

        let pool = pool.clone();
        let mtu = config.max_message_size as usize;
        tokio::spawn(async move {
            let (r, w) = stream.into_split();
            let transport = Box::new(StreamTransport::new(r, w, mtu));
            if let Err(e) = pool.accept(transport).await {
                error!("session for {:?} ended with error: {}", peer, e);
            }
        });
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = tcpd_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        -1
    });

    std::process::exit(exit_code);
}
