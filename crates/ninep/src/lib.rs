#![forbid(unsafe_code)]
//! A 9P2000 file-server framework for memory-constrained devices.
//!
//! This crate provides a tokio-based implementation of the base 9P2000
//! protocol (no `.u`/`.L` extensions): the wire codec, a per-connection
//! session state machine, and a fixed-capacity session pool, built around an
//! abstract [`fs::Filesystem`] capability so the same server core can sit in
//! front of any backend that implements it.
//!
//! # Overview
//!
//! 9P was originally developed for the Plan 9 distributed operating system:
//! a small message set built around file handles (fids) and stable file
//! identities (qids), deliberately simple enough to run on constrained
//! hardware over a variety of transports.
//!
//! # Getting Started
//!
//! To serve a filesystem:
//!
//! 1. Implement [`fs::Filesystem`] for your backend (or use
//!    [`ninep_ramfs`](https://docs.rs/ninep-ramfs) for a ready-made
//!    in-memory tree).
//! 2. Build a [`config::Config`] describing your limits.
//! 3. Wrap each accepted connection in a [`transport::Transport`]
//!    ([`transport::StreamTransport`] for TCP/serial,
//!    [`transport::DatagramTransport`] for small-MTU links) and hand it to a
//!    [`pool::SessionPool`].
//!
//! # Example
//!
//! ```no_run
//! use ninep::{config::Config, pool::SessionPool, transport::StreamTransport};
//! use std::sync::Arc;
//!
//! # async fn run(fs: impl ninep::fs::Filesystem + 'static) -> std::io::Result<()> {
//! let pool = Arc::new(SessionPool::new(Arc::new(fs), Config::default()));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:564").await?;
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let (r, w) = stream.into_split();
//!     let transport = Box::new(StreamTransport::new(r, w, 8192));
//!     let pool = pool.clone();
//!     tokio::spawn(async move { let _ = pool.accept(transport).await; });
//! }
//! # }
//! ```
//!
//! # Protocol Details
//!
//! ## Message Flow
//!
//! 1. **Version negotiation**: `Tversion`/`Rversion`.
//! 2. **Attach**: `Tattach` binds a fid to the backend root.
//! 3. **Operations**: `Twalk`/`Topen`/`Tcreate`/`Tread`/`Twrite`/`Tstat`/
//!    `Twstat`/`Tremove` against fids.
//! 4. **Cleanup**: `Tclunk` releases a fid.
//!
//! ## Fid Management
//!
//! A fid is a client-chosen 32-bit handle, scoped to one session. Walking
//! creates a new fid without invalidating the old one; `Tclunk` invalidates
//! it.
//!
//! ## Dispatch
//!
//! Every session processes one request to completion before reading the
//! next frame — no request is ever interleaved with another on the same
//! connection. This removes the need for per-fid locking and makes
//! `Tflush` a pure acknowledgement: see [`session`].
//!
//! # Error Handling
//!
//! Operations return [`error::Error`]; the session converts any error into
//! an `Rerror` carrying the stable string from [`error::ErrorKind::message`].
//!
//! # Transport
//!
//! Two transport flavors are provided:
//! - [`transport::StreamTransport`] — reliable byte streams (TCP, serial),
//!   framed on the leading `size[4]`.
//! - [`transport::DatagramTransport`] — small-MTU datagram links, with
//!   block-wise segmentation and reassembly.
//!
//! # Feature Flags
//!
//! This crate uses workspace dependencies and requires `tokio` (`full`) for
//! its async runtime and `async-trait` for trait async methods.
//!
//! # Safety
//!
//! This crate forbids unsafe code (`#![forbid(unsafe_code)]`).
pub mod config;
pub mod error;
pub mod fcall;
pub mod fid;
pub mod fs;
pub mod pool;
pub mod serialize;
pub mod session;
pub mod tag;
pub mod transport;
#[macro_use]
pub mod utils;

pub use crate::error::Error;
pub use crate::fcall::*;
pub use crate::utils::Result;
