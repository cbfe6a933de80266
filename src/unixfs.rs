//! Filesystem-addressed local sockets: a RAM-backed tree whose leaves are
//! datagram endpoints rather than byte stores.

use crate::dir::DirCache;
use crate::error::{VfsError, VfsResult};
use crate::file::{File, FileKind, FileRef};
use crate::fs::Filesystem;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::Notify;
use tracing::debug;

const ROOT_INODE: u64 = 1;

/// Datagrams queued per socket before senders block.
pub const DEFAULT_BACKLOG: usize = 32;

/// Bounded datagram queue behind a socket file. Datagram boundaries are
/// preserved; a short read truncates and discards the remainder.
pub struct SocketState {
    queue: Mutex<VecDeque<Bytes>>,
    capacity: usize,
    readable: Notify,
    writable: Notify,
}

impl SocketState {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    /// Queue one datagram, waiting while the backlog is full.
    pub async fn send(&self, datagram: Bytes) {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if queue.len() < self.capacity {
                    queue.push_back(datagram);
                    self.readable.notify_one();
                    return;
                }
            }
            self.writable.notified().await;
        }
    }

    /// Queue one datagram without waiting. `false` when the backlog is
    /// full.
    pub fn try_send(&self, datagram: Bytes) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() >= self.capacity {
            return false;
        }
        queue.push_back(datagram);
        self.readable.notify_one();
        true
    }

    /// Dequeue the oldest datagram, waiting while the queue is empty.
    pub async fn recv(&self) -> Bytes {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if let Some(datagram) = queue.pop_front() {
                    self.writable.notify_one();
                    return datagram;
                }
            }
            self.readable.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Bytes> {
        let datagram = self.queue.lock().unwrap().pop_front();
        if datagram.is_some() {
            self.writable.notify_one();
        }
        datagram
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

/// Tree of directories and socket files. Binding a name creates a socket;
/// reads and writes on it move whole datagrams.
pub struct UnixFilesystem {
    root: OnceLock<FileRef>,
    next_inode: AtomicU64,
}

impl UnixFilesystem {
    pub fn new() -> Arc<Self> {
        let fs = Arc::new(Self {
            root: OnceLock::new(),
            next_inode: AtomicU64::new(ROOT_INODE + 1),
        });
        let weak = Arc::downgrade(&(fs.clone() as Arc<dyn Filesystem>));
        let root = File::new(
            "/",
            ROOT_INODE,
            FileKind::Directory(DirCache::new(true)),
            0o755,
            weak,
        );
        root.dir().expect("root is a directory").mark_populated();
        fs.root.set(root).ok();
        fs
    }

    /// Build a socket file without inserting it anywhere, for ephemeral
    /// binds via `add_ephemeral_file`. A collision there leaves this file
    /// unreferenced and it simply drops.
    pub fn new_socket(self: &Arc<Self>, name: &str) -> FileRef {
        File::new(
            name,
            self.next_inode.fetch_add(1, Ordering::SeqCst),
            FileKind::Socket(SocketState::new(DEFAULT_BACKLOG)),
            0o600,
            Arc::downgrade(&(self.clone() as Arc<dyn Filesystem>)),
        )
    }
}

#[async_trait]
impl Filesystem for UnixFilesystem {
    fn volume_label(&self) -> String {
        "unix".to_string()
    }

    fn root(&self) -> FileRef {
        self.root.get().expect("initialized at construction").clone()
    }

    async fn create_file(&self, parent: &FileRef, name: &str, mode: u32) -> VfsResult<FileRef> {
        if parent.dir()?.lookup_cached(name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        let socket = File::new(
            name,
            self.next_inode.fetch_add(1, Ordering::SeqCst),
            FileKind::Socket(SocketState::new(DEFAULT_BACKLOG)),
            mode,
            Arc::downgrade(&fs),
        );
        parent.dir()?.insert(name, socket.clone());
        socket.set_parent(parent);
        parent.mark_modified();
        debug!(name, "bound socket");
        Ok(socket)
    }

    async fn create_directory(
        &self,
        parent: &FileRef,
        name: &str,
        mode: u32,
    ) -> VfsResult<FileRef> {
        if parent.dir()?.lookup_cached(name).is_some() {
            return Err(VfsError::AlreadyExists);
        }
        let fs = parent.filesystem().ok_or(VfsError::DoesNotExist)?;
        let dir = File::new(
            name,
            self.next_inode.fetch_add(1, Ordering::SeqCst),
            FileKind::Directory(DirCache::new(true)),
            mode,
            Arc::downgrade(&fs),
        );
        dir.dir()?.mark_populated();
        parent.dir()?.insert(name, dir.clone());
        dir.set_parent(parent);
        Ok(dir)
    }

    async fn remove(&self, _parent: &FileRef, file: &FileRef) -> VfsResult<()> {
        if let Some(cache) = file.as_dir() {
            if !cache.is_empty() {
                return Err(VfsError::NotEmpty);
            }
        }
        Ok(())
    }

    /// One datagram per read. The offset is ignored; a small buffer
    /// truncates the datagram and the rest is discarded.
    async fn read(&self, file: &FileRef, _offset: u64, buf: &mut [u8]) -> VfsResult<usize> {
        let socket = file.as_socket().ok_or(VfsError::Unsupported)?;
        let datagram = socket.recv().await;
        let n = buf.len().min(datagram.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }

    /// One datagram per write, queued whole.
    async fn write(&self, file: &FileRef, _offset: u64, data: &[u8]) -> VfsResult<usize> {
        let socket = file.as_socket().ok_or(VfsError::Unsupported)?;
        socket.send(Bytes::copy_from_slice(data)).await;
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::Vfs;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_bind_and_datagram_roundtrip() {
        let vfs = Vfs::new();
        vfs.add_alias(UnixFilesystem::new(), "unix");
        vfs.create_directory("unix»/tmp", 0o777).await.unwrap();
        let sock = vfs.create_file("unix»/tmp/svc.sock", 0o600).await.unwrap();
        assert!(sock.as_socket().is_some());

        sock.write_at(0, b"ping").await.unwrap();
        sock.write_at(0, b"pong").await.unwrap();

        let mut buf = [0u8; 16];
        let n = sock.read_at(0, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = sock.read_at(0, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[tokio::test]
    async fn test_short_read_truncates_datagram() {
        let fs = UnixFilesystem::new();
        let root = fs.root();
        let sock = fs.create_file(&root, "s", 0o600).await.unwrap();
        sock.as_socket().unwrap().try_send(Bytes::from_static(b"0123456789"));
        sock.as_socket().unwrap().try_send(Bytes::from_static(b"next"));

        let mut buf = [0u8; 4];
        assert_eq!(sock.read_at(0, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
        // The truncated tail is gone; the next read sees the next datagram.
        assert_eq!(sock.read_at(0, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"next");
    }

    #[tokio::test]
    async fn test_recv_blocks_until_send() {
        let fs = UnixFilesystem::new();
        let root = fs.root();
        let sock = fs.create_file(&root, "s", 0o600).await.unwrap();

        let reader = sock.clone();
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 8];
            let n = reader.read_at(0, &mut buf).await.unwrap();
            buf[..n].to_vec()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        sock.write_at(0, b"wake").await.unwrap();
        let got = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(got, b"wake");
    }

    #[tokio::test]
    async fn test_backlog_blocks_sender() {
        let state = Arc::new(SocketState::new(2));
        assert!(state.try_send(Bytes::from_static(b"1")));
        assert!(state.try_send(Bytes::from_static(b"2")));
        assert!(!state.try_send(Bytes::from_static(b"3")));

        let sender = state.clone();
        let handle = tokio::spawn(async move {
            sender.send(Bytes::from_static(b"3")).await;
        });
        // Blocked until a recv drains one slot.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        assert_eq!(state.recv().await, Bytes::from_static(b"1"));
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(state.pending(), 2);
    }

    #[tokio::test]
    async fn test_ephemeral_bind_collision() {
        let fs = UnixFilesystem::new();
        let root = fs.root();
        fs.create_file(&root, "taken", 0o600).await.unwrap();

        let clash = fs.new_socket("taken");
        assert!(!root.add_ephemeral_file(clash).await.unwrap());

        let fresh = fs.new_socket("anon-1");
        assert!(root.add_ephemeral_file(fresh.clone()).await.unwrap());
        let hit = root.lookup("anon-1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&hit, &fresh));

        // Unbinding removes the name.
        root.dir().unwrap().remove("anon-1");
        assert!(root.lookup("anon-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_socket_removal_through_vfs() {
        let vfs = Vfs::new();
        vfs.add_alias(UnixFilesystem::new(), "unix");
        vfs.create_file("unix»/s", 0o600).await.unwrap();
        vfs.remove("unix»/s").await.unwrap();
        assert!(matches!(
            vfs.find("unix»/s").await,
            Err(VfsError::DoesNotExist)
        ));
    }
}
