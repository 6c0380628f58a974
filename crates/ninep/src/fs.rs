//! The Filesystem capability: the abstract operation set every backend
//! implements, dispatched to by the session state machine.

use async_trait::async_trait;

use crate::error::{Error, ErrorKind};
use crate::fcall::{OpenMode, QId, Stat};

/// One backend-owned file or directory, opaque to the session.
///
/// A backend node may outlive the fid that names it (another fid can walk to
/// the same file); handles are therefore owned by the backend — arena
/// indices or reference-counted values are typical implementations — and the
/// session only ever holds a clone of the handle plus the qid that was
/// returned alongside it.
pub trait Node: Clone + Send + Sync {}
impl<T: Clone + Send + Sync> Node for T {}

/// The minimal operation set a 9P2000 backend must provide.
///
/// Implementations should be internally safe for concurrent calls from
/// multiple sessions — the core serializes requests *within* a session but
/// runs sessions in parallel against one shared backend.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Opaque handle identifying a node within this backend.
    type Handle: Node;

    /// The backend's root, handed out on every `Tattach`.
    async fn root(&self) -> Result<(Self::Handle, QId), Error>;

    /// Walk one path component from `from`. Must never ascend past the root
    /// on `".."`; backends typically just return the root's own handle again.
    async fn walk(&self, from: &Self::Handle, name: &str) -> Result<(Self::Handle, QId), Error>;

    /// Validate and record an open; directories opened for write fail `IsDir`.
    async fn open(&self, node: &Self::Handle, mode: OpenMode) -> Result<(), Error>;

    /// Create `name` under the directory `parent`, then open it with `mode`.
    async fn create(
        &self,
        parent: &Self::Handle,
        name: &str,
        perm: u32,
        mode: OpenMode,
    ) -> Result<(Self::Handle, QId), Error>;

    /// Read up to `buf.len()` bytes at `offset`. Returns bytes read (`0` at
    /// EOF). For a directory, the concatenation of encoded [`Stat`] records;
    /// the session enforces offset alignment, the backend just serves bytes.
    async fn read(&self, node: &Self::Handle, offset: u64, buf: &mut [u8]) -> Result<u32, Error>;

    /// Write `data` at `offset`; append-only nodes ignore `offset`.
    async fn write(&self, node: &Self::Handle, offset: u64, data: &[u8]) -> Result<u32, Error>;

    /// Release any open state held for `node`. Must not fail observably to
    /// the caller — the session always acks `Tclunk` regardless of what this
    /// returns; backends should log internally instead.
    async fn clunk(&self, node: &Self::Handle) -> Result<(), Error>;

    /// Delete `node`. Fails `Denied` or `NotEmpty`.
    async fn remove(&self, node: &Self::Handle) -> Result<(), Error>;

    async fn stat(&self, node: &Self::Handle) -> Result<Stat, Error>;

    /// Apply field mutations from `stat`; fields holding the protocol's
    /// "don't touch" sentinels (empty strings, `~0`) are left alone.
    async fn wstat(&self, node: &Self::Handle, stat: &Stat) -> Result<(), Error>;

    /// Stat records read as one `Tread` on a directory, starting at `index`
    /// (the count of entries already consumed, not a byte offset). Used by
    /// the session to serve directory reads without asking the backend to
    /// understand the wire stat-record boundary rule itself.
    async fn readdir(&self, node: &Self::Handle, index: usize, max: usize) -> Result<Vec<Stat>, Error>;

    async fn is_dir(&self, node: &Self::Handle) -> Result<bool, Error>;

    /// The node backing an auth-fid, handed out on `Tauth` when the session
    /// is configured to require authentication. The 9P2000 handshake that
    /// follows (what gets read/written against the resulting fid) is
    /// backend-specific and outside this capability; the default refuses
    /// auth, which is correct for backends — like the RAM reference tree —
    /// that implement none.
    async fn auth_root(&self) -> Result<(Self::Handle, QId), Error> {
        Err(ErrorKind::AuthRequired.into())
    }
}
