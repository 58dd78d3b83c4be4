use std::fs;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use tracing::{debug, info, warn};

use crate::config::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::link::{LinkKind, LinkReader, LinkWriter};
use crate::traits::{Channel, ChannelEvents};

/// Listening side of the socket reference link.
///
/// Stands in for the second core on hosted builds: one accepted stream is
/// one channel.
pub struct SocketListener {
    listener: UnixListener,
    file: SocketFile,
    config: ChannelConfig,
}

impl SocketListener {
    /// Permission mode applied to the socket file.
    pub const SOCKET_MODE: u32 = 0o600;

    // `sockaddr_un.sun_path` capacity, including the terminating NUL.
    #[cfg(target_os = "linux")]
    const SUN_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const SUN_PATH_LEN: usize = 104;

    /// Listen on `path`, replacing a socket left behind by an earlier run.
    pub fn bind(path: impl AsRef<Path>, config: ChannelConfig) -> Result<Self> {
        let path = path.as_ref();
        let len = path.as_os_str().len();
        if len >= Self::SUN_PATH_LEN {
            return Err(ChannelError::PathTooLong {
                path: path.to_path_buf(),
                len,
                max: Self::SUN_PATH_LEN,
            });
        }

        let (listener, file) =
            SocketFile::create(path, Self::SOCKET_MODE).map_err(|e| bind_error(path, e))?;
        info!(path = ?file.path, "listening for channel link");
        Ok(Self {
            listener,
            file,
            config,
        })
    }

    /// Accept one link (blocking).
    pub fn accept(&self) -> Result<SocketChannel> {
        let (stream, _addr) = self.listener.accept().map_err(ChannelError::Accept)?;
        debug!(path = ?self.file.path, "accepted channel link");
        SocketChannel::from_stream(stream, self.config)
    }

    /// The path this listener is bound to.
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// The socket file a listener created; unlinked on drop unless something
/// else has taken its place.
struct SocketFile {
    path: PathBuf,
    identity: (u64, u64),
}

impl SocketFile {
    fn create(path: &Path, mode: u32) -> io::Result<(UnixListener, Self)> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!(?path, "replacing stale socket");
                fs::remove_file(path)?;
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                ));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let listener = UnixListener::bind(path)?;
        let identity = socket_identity(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "socket file vanished"))?;
        let file = Self {
            path: path.to_path_buf(),
            identity,
        };
        // Dropping `file` unlinks the path if the mode cannot be applied.
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        Ok((listener, file))
    }
}

impl Drop for SocketFile {
    fn drop(&mut self) {
        if socket_identity(&self.path) != Some(self.identity) {
            debug!(path = ?self.path, "socket file replaced, leaving it");
            return;
        }
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(path = ?self.path, error = %err, "socket file not removed");
        }
    }
}

/// Device and inode of the socket at `path`, if a socket is there.
fn socket_identity(path: &Path) -> Option<(u64, u64)> {
    let meta = fs::symlink_metadata(path).ok()?;
    meta.file_type()
        .is_socket()
        .then(|| (meta.dev(), meta.ino()))
}

fn bind_error(path: &Path, source: io::Error) -> ChannelError {
    ChannelError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// A channel carried over a connected Unix stream.
///
/// `open` sends a bind hello and starts a reader thread. The channel is
/// bound once the remote hello arrives; from then on every link message is
/// delivered to `received` on the reader thread.
pub struct SocketChannel {
    config: ChannelConfig,
    reader: Mutex<Option<UnixStream>>,
    writer: Mutex<LinkWriter<UnixStream>>,
    bound: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl SocketChannel {
    /// Connect to a listening link (blocking).
    pub fn connect(path: impl AsRef<Path>, config: ChannelConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|e| ChannelError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(?path, "connected channel link");
        Self::from_stream(stream, config)
    }

    /// Wrap an already connected stream, e.g. one half of `UnixStream::pair`.
    pub fn from_stream(stream: UnixStream, config: ChannelConfig) -> Result<Self> {
        let reader = stream.try_clone()?;
        Ok(Self {
            config,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(LinkWriter::new(stream)),
            bound: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// Whether the reader thread has seen the link end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn write(&self, kind: LinkKind, payload: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().map_err(|_| ChannelError::Closed)?;
        writer.write_message(kind, payload)
    }
}

impl Channel for SocketChannel {
    fn open(&self, events: Weak<dyn ChannelEvents>) -> Result<()> {
        let stream = self
            .reader
            .lock()
            .map_err(|_| ChannelError::Closed)?
            .take()
            .ok_or(ChannelError::AlreadyOpen)?;

        self.write(LinkKind::Hello, &[])?;

        let reader = LinkReader::new(stream, self.config.max_message_size);
        let bound = Arc::clone(&self.bound);
        let closed = Arc::clone(&self.closed);
        thread::Builder::new()
            .name("coremux-socket-reader".to_string())
            .spawn(move || reader_loop(reader, events, bound, closed))?;
        Ok(())
    }

    fn send(&self, msg: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        if !self.is_bound() {
            return Err(ChannelError::NotBound);
        }
        if msg.len() > self.config.max_message_size {
            return Err(ChannelError::MessageTooLarge {
                size: msg.len(),
                max: self.config.max_message_size,
            });
        }
        self.write(LinkKind::Message, msg)
    }

    fn name(&self) -> &'static str {
        "unix-socket"
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        // Unblocks the reader thread on both ends; its clone keeps the socket open otherwise.
        if let Ok(writer) = self.writer.lock() {
            let _ = writer.get_ref().shutdown(std::net::Shutdown::Both);
        }
    }
}

impl std::fmt::Debug for SocketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketChannel")
            .field("config", &self.config)
            .field("bound", &self.is_bound())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

fn reader_loop(
    mut reader: LinkReader<UnixStream>,
    events: Weak<dyn ChannelEvents>,
    bound: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let msg = match reader.read_message() {
            Ok(msg) => msg,
            Err(ChannelError::Closed) => {
                debug!("channel link closed by remote");
                break;
            }
            Err(err) => {
                warn!(error = %err, "channel link read failed");
                break;
            }
        };

        let Some(target) = events.upgrade() else {
            debug!("event target gone; stopping link reader");
            break;
        };

        match msg.kind {
            LinkKind::Hello => {
                if bound.swap(true, Ordering::AcqRel) {
                    warn!("duplicate bind hello on channel link; ignoring");
                } else {
                    debug!("channel link bound");
                    target.bound();
                }
            }
            LinkKind::Message if bound.load(Ordering::Acquire) => target.received(&msg.payload),
            LinkKind::Message => warn!(size = msg.payload.len(), "message before bind hello; dropping"),
        }
    }
    closed.store(true, Ordering::Release);
}
