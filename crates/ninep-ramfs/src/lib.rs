//! An in-memory reference filesystem backend for [`ninep`].
//!
//! An arena of nodes behind a single mutex: directories hold a list of
//! (name, index) children, files hold a byte buffer. Qid `path` is assigned
//! from a monotonic counter; `version` bumps on every successful write or
//! wstat. Nothing is persisted, and removal only detaches a node from its
//! parent — orphaned nodes are reclaimed when the arena itself is dropped.

use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use ninep::error::{Error, ErrorKind};
use ninep::fcall::{OpenMode, QId, QidType, Stat};
use ninep::fs::Filesystem;

#[derive(Debug, Clone)]
enum Content {
    Dir(Vec<(String, usize)>),
    File(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Node {
    path: u64,
    version: u32,
    mode: u32,
    content: Content,
    /// `None` for the root, which has no parent to detach from.
    parent: Option<usize>,
    /// The node's own name, as its parent knows it. Empty for the root,
    /// which has no parent entry naming it.
    name: String,
}

impl Node {
    fn is_dir(&self) -> bool {
        matches!(self.content, Content::Dir(_))
    }

    fn qid(&self) -> QId {
        QId {
            typ: if self.is_dir() { QidType::DIR } else { QidType::FILE },
            version: self.version,
            path: self.path,
        }
    }
}

struct Arena {
    nodes: Vec<Option<Node>>,
    next_path: u64,
}

impl Arena {
    fn new() -> Self {
        let root = Node {
            path: 0,
            version: 0,
            mode: 0o755,
            content: Content::Dir(Vec::new()),
            parent: None,
            name: String::new(),
        };
        Arena { nodes: vec![Some(root)], next_path: 1 }
    }

    fn alloc(&mut self, mode: u32, content: Content, parent: usize, name: String) -> usize {
        let path = self.next_path;
        self.next_path += 1;
        let node = Node { path, version: 0, mode, content, parent: Some(parent), name };
        self.nodes.push(Some(node));
        self.nodes.len() - 1
    }

    fn get(&self, index: usize) -> Result<&Node, Error> {
        self.nodes.get(index).and_then(|n| n.as_ref()).ok_or_else(|| ErrorKind::NotFound.into())
    }

    fn get_mut(&mut self, index: usize) -> Result<&mut Node, Error> {
        self.nodes.get_mut(index).and_then(|n| n.as_mut()).ok_or_else(|| ErrorKind::NotFound.into())
    }
}

/// A handle into the arena: an index plus the path it pointed to when
/// issued, so a stale handle (its node since removed and the slot recycled
/// for something else) is detected rather than silently aliased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamHandle {
    index: usize,
    path: u64,
}

/// The in-memory reference backend.
pub struct RamFs {
    arena: Mutex<Arena>,
}

impl Default for RamFs {
    fn default() -> Self {
        RamFs::new()
    }
}

impl RamFs {
    pub fn new() -> Self {
        RamFs { arena: Mutex::new(Arena::new()) }
    }

    fn root_handle(&self) -> RamHandle {
        RamHandle { index: 0, path: 0 }
    }

    fn resolve<'a>(&self, arena: &'a Arena, handle: &RamHandle) -> Result<&'a Node, Error> {
        let node = arena.get(handle.index)?;
        if node.path != handle.path {
            return Err(ErrorKind::NotFound.into());
        }
        Ok(node)
    }

    /// Create a file at `name` under the directory `parent` with `data`
    /// already populated. For host-side tree building (tests, the demo
    /// binary's seed data) — not part of the client-facing capability.
    pub fn create_file(&self, parent: &RamHandle, name: &str, data: Vec<u8>) -> Result<RamHandle, Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        self.insert_child(&mut arena, parent, name, 0o644, Content::File(data))
    }

    /// Create a directory at `name` under the directory `parent`.
    pub fn create_dir(&self, parent: &RamHandle, name: &str) -> Result<RamHandle, Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        self.insert_child(&mut arena, parent, name, 0o755, Content::Dir(Vec::new()))
    }

    fn insert_child(
        &self,
        arena: &mut Arena,
        parent: &RamHandle,
        name: &str,
        mode: u32,
        content: Content,
    ) -> Result<RamHandle, Error> {
        {
            let p = self.resolve(arena, parent)?;
            if !p.is_dir() {
                return Err(ErrorKind::NotDir.into());
            }
            if let Content::Dir(children) = &p.content {
                if children.iter().any(|(n, _)| n == name) {
                    return Err(ErrorKind::Exists.into());
                }
            }
        }
        let index = arena.alloc(mode, content, parent.index, name.to_owned());
        let path = arena.get(index)?.path;
        if let Content::Dir(children) = &mut arena.get_mut(parent.index)?.content {
            children.push((name.to_owned(), index));
        }
        Ok(RamHandle { index, path })
    }
}

#[async_trait]
impl Filesystem for RamFs {
    type Handle = RamHandle;

    async fn root(&self) -> Result<(RamHandle, QId), Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        let h = self.root_handle();
        let qid = self.resolve(&arena, &h)?.qid();
        Ok((h, qid))
    }

    async fn walk(&self, from: &RamHandle, name: &str) -> Result<(RamHandle, QId), Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        let node = self.resolve(&arena, from)?;

        if name == ".." {
            let parent_index = node.parent.unwrap_or(from.index);
            let parent = arena.get(parent_index)?;
            return Ok((RamHandle { index: parent_index, path: parent.path }, parent.qid()));
        }

        let Content::Dir(children) = &node.content else {
            return Err(ErrorKind::NotDir.into());
        };
        let child_index = children.iter().find(|(n, _)| n == name).map(|(_, i)| *i).ok_or(ErrorKind::NotFound)?;
        let child = arena.get(child_index)?;
        Ok((RamHandle { index: child_index, path: child.path }, child.qid()))
    }

    async fn open(&self, node: &RamHandle, mode: OpenMode) -> Result<(), Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        let n = self.resolve(&arena, node)?;
        if n.is_dir() && mode.is_write_access() {
            return Err(ErrorKind::IsDir.into());
        }
        if mode.truncate() {
            if let Content::File(data) = &mut arena.get_mut(node.index)?.content {
                data.clear();
            }
        }
        Ok(())
    }

    async fn create(&self, parent: &RamHandle, name: &str, perm: u32, mode: OpenMode) -> Result<(RamHandle, QId), Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        let content = if perm & 0o40000 != 0 { Content::Dir(Vec::new()) } else { Content::File(Vec::new()) };
        let handle = self.insert_child(&mut arena, parent, name, perm, content)?;
        let qid = self.resolve(&arena, &handle)?.qid();
        let _ = mode;
        Ok((handle, qid))
    }

    async fn read(&self, node: &RamHandle, offset: u64, buf: &mut [u8]) -> Result<u32, Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        let n = self.resolve(&arena, node)?;
        let Content::File(data) = &n.content else {
            return Err(ErrorKind::IsDir.into());
        };
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = (data.len() - offset).min(buf.len());
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n as u32)
    }

    async fn write(&self, node: &RamHandle, offset: u64, data: &[u8]) -> Result<u32, Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        self.resolve(&arena, node)?;
        let n = arena.get_mut(node.index)?;
        let Content::File(buf) = &mut n.content else {
            return Err(ErrorKind::IsDir.into());
        };
        let offset = offset as usize;
        if offset + data.len() > buf.len() {
            buf.resize(offset + data.len(), 0);
        }
        buf[offset..offset + data.len()].copy_from_slice(data);
        n.version += 1;
        Ok(data.len() as u32)
    }

    async fn clunk(&self, node: &RamHandle) -> Result<(), Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        let _ = self.resolve(&arena, node);
        Ok(())
    }

    async fn remove(&self, node: &RamHandle) -> Result<(), Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        let n = self.resolve(&arena, node)?;
        if let Content::Dir(children) = &n.content {
            if !children.is_empty() {
                return Err(ErrorKind::NotEmpty.into());
            }
        }
        let Some(parent_index) = n.parent else {
            return Err(ErrorKind::Denied.into());
        };
        if let Content::Dir(children) = &mut arena.get_mut(parent_index)?.content {
            children.retain(|(_, i)| *i != node.index);
        }
        arena.nodes[node.index] = None;
        debug!("removed node at index {}", node.index);
        Ok(())
    }

    async fn stat(&self, node: &RamHandle) -> Result<Stat, Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        let n = self.resolve(&arena, node)?;
        let length = match &n.content {
            Content::File(data) => data.len() as u64,
            Content::Dir(_) => 0,
        };
        Ok(Stat {
            typ: 0,
            dev: 0,
            qid: n.qid(),
            mode: n.mode | if n.is_dir() { 0o40000 } else { 0 },
            atime: 0,
            mtime: 0,
            length,
            name: n.name.clone(),
            uid: "ninep".to_owned(),
            gid: "ninep".to_owned(),
            muid: "ninep".to_owned(),
        })
    }

    async fn wstat(&self, node: &RamHandle, stat: &Stat) -> Result<(), Error> {
        let mut arena = self.arena.lock().expect("ramfs mutex poisoned");
        self.resolve(&arena, node)?;
        let n = arena.get_mut(node.index)?;
        if stat.mode != ninep::fcall::DONT_TOUCH_U32 {
            n.mode = stat.mode;
        }
        if stat.length != ninep::fcall::DONT_TOUCH_U64 {
            if let Content::File(data) = &mut n.content {
                data.resize(stat.length as usize, 0);
            }
        }
        n.version += 1;
        Ok(())
    }

    async fn readdir(&self, node: &RamHandle, index: usize, max: usize) -> Result<Vec<Stat>, Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        let n = self.resolve(&arena, node)?;
        let Content::Dir(children) = &n.content else {
            return Err(ErrorKind::NotDir.into());
        };

        let mut out = Vec::new();
        for (name, child_index) in children.iter().skip(index).take(max.max(1)) {
            let child = arena.get(*child_index)?;
            let length = match &child.content {
                Content::File(data) => data.len() as u64,
                Content::Dir(_) => 0,
            };
            out.push(Stat {
                typ: 0,
                dev: 0,
                qid: child.qid(),
                mode: child.mode | if child.is_dir() { 0o40000 } else { 0 },
                atime: 0,
                mtime: 0,
                length,
                name: name.clone(),
                uid: "ninep".to_owned(),
                gid: "ninep".to_owned(),
                muid: "ninep".to_owned(),
            });
        }
        Ok(out)
    }

    async fn is_dir(&self, node: &RamHandle) -> Result<bool, Error> {
        let arena = self.arena.lock().expect("ramfs mutex poisoned");
        Ok(self.resolve(&arena, node)?.is_dir())
    }
}
