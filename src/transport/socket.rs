//! Stream sockets for the message transport: Unix (path or abstract) and TCP,
//! connecting or listening, with out-of-band descriptor passing on Unix.

use std::io::{self, Read, Write};
use std::mem;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::ptr;

use tracing::{debug, trace};

use super::address::{BusAddress, Endpoint};
use super::error::TransportError;

/// Most descriptors accepted alongside one read.
const MAX_FDS_PER_READ: usize = 253;

/// Connected byte channel.
#[derive(Debug)]
pub enum Stream {
    /// Unix-domain stream socket.
    Unix(UnixStream),
    /// TCP stream socket.
    Tcp(TcpStream),
}

impl Stream {
    /// Connect to the endpoint of `address`.
    pub fn connect(address: &BusAddress) -> Result<Self, TransportError> {
        let stream = match address.endpoint() {
            Endpoint::UnixPath(path) => Self::Unix(UnixStream::connect(path)?),
            Endpoint::UnixAbstract(name) => Self::Unix(connect_abstract(name)?),
            Endpoint::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))?;
                stream.set_nodelay(true)?;
                Self::Tcp(stream)
            }
        };
        debug!(%address, "socket connected");
        Ok(stream)
    }

    /// Whether descriptors can travel over this channel.
    #[must_use]
    pub fn supports_fds(&self) -> bool {
        matches!(self, Self::Unix(_))
    }

    /// Kernel-reported uid of the peer process, Unix sockets only.
    #[must_use]
    pub fn peer_uid(&self) -> Option<u32> {
        match self {
            Self::Unix(stream) => peer_uid(stream.as_fd()),
            Self::Tcp(_) => None,
        }
    }

    /// Second handle to the same socket.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Self::Unix(stream) => Self::Unix(stream.try_clone()?),
            Self::Tcp(stream) => Self::Tcp(stream.try_clone()?),
        })
    }

    /// Shut down one or both directions; unblocks a reader parked in `read`.
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let result = match self {
            Self::Unix(stream) => stream.shutdown(how),
            Self::Tcp(stream) => stream.shutdown(how),
        };
        match result {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    /// Write `buf` with `fds` attached to its first byte.
    pub fn send_with_fds(&self, buf: &[u8], fds: &[BorrowedFd<'_>]) -> Result<usize, TransportError> {
        match self {
            Self::Unix(stream) => {
                let raw: Vec<RawFd> = fds.iter().map(AsRawFd::as_raw_fd).collect();
                Ok(sendmsg_rights(stream.as_raw_fd(), buf, &raw)?)
            }
            Self::Tcp(_) if fds.is_empty() => Ok((&*self).write(buf)?),
            Self::Tcp(_) => Err(TransportError::FdPassingUnsupported),
        }
    }

    /// Read into `buf`, collecting any descriptors that arrive with the data.
    pub fn recv_with_fds(&self, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> io::Result<usize> {
        match self {
            Self::Unix(stream) => recvmsg_rights(stream.as_raw_fd(), buf, fds),
            Self::Tcp(_) => (&*self).read(buf),
        }
    }
}

impl Read for &Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(stream) => (&*stream).read(buf),
            Stream::Tcp(stream) => (&*stream).read(buf),
        }
    }
}

impl Write for &Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Unix(stream) => (&*stream).write(buf),
            Stream::Tcp(stream) => (&*stream).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Unix(stream) => (&*stream).flush(),
            Stream::Tcp(stream) => (&*stream).flush(),
        }
    }
}

/// Passive socket accepting client channels.
#[derive(Debug)]
pub struct Listener {
    socket: ListenerSocket,
    address: BusAddress,
}

#[derive(Debug)]
enum ListenerSocket {
    Unix {
        listener: UnixListener,
        cleanup: Option<PathBuf>,
    },
    Tcp(TcpListener),
}

impl Listener {
    /// Bind the endpoint of `address`. A TCP port of `0` picks a free port.
    pub fn bind(address: &BusAddress) -> Result<Self, TransportError> {
        let (socket, endpoint) = match address.endpoint() {
            Endpoint::UnixPath(path) => {
                let listener = UnixListener::bind(path)?;
                (
                    ListenerSocket::Unix {
                        listener,
                        cleanup: Some(path.clone()),
                    },
                    address.endpoint().clone(),
                )
            }
            Endpoint::UnixAbstract(name) => (
                ListenerSocket::Unix {
                    listener: bind_abstract(name)?,
                    cleanup: None,
                },
                address.endpoint().clone(),
            ),
            Endpoint::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port))?;
                let bound = listener.local_addr()?;
                (
                    ListenerSocket::Tcp(listener),
                    Endpoint::Tcp {
                        host: host.clone(),
                        port: bound.port(),
                    },
                )
            }
        };
        let mut resolved = match endpoint {
            Endpoint::UnixPath(path) => BusAddress::unix_path(path),
            Endpoint::UnixAbstract(name) => BusAddress::unix_abstract(name),
            Endpoint::Tcp { host, port } => BusAddress::tcp(host, port),
        };
        if let Some(guid) = address.guid() {
            resolved = resolved.with_guid(guid);
        }
        debug!(address = %resolved, "listening");
        Ok(Self {
            socket,
            address: resolved,
        })
    }

    /// Block until a client connects.
    pub fn accept(&self) -> Result<Stream, TransportError> {
        let stream = match &self.socket {
            ListenerSocket::Unix { listener, .. } => Stream::Unix(listener.accept()?.0),
            ListenerSocket::Tcp(listener) => {
                let (stream, peer) = listener.accept()?;
                stream.set_nodelay(true)?;
                trace!(%peer, "accepted tcp client");
                Stream::Tcp(stream)
            }
        };
        Ok(stream)
    }

    /// Address clients should connect to (resolved port, no `listen` flag).
    #[must_use]
    pub fn address(&self) -> &BusAddress {
        &self.address
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let ListenerSocket::Unix {
            cleanup: Some(path),
            ..
        } = &self.socket
        {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn connect_abstract(name: &str) -> io::Result<UnixStream> {
    use std::os::linux::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixStream::connect_addr(&addr)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn connect_abstract(_name: &str) -> io::Result<UnixStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract unix sockets are linux-only",
    ))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_abstract(name: &str) -> io::Result<UnixListener> {
    use std::os::linux::net::SocketAddrExt;
    let addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
    UnixListener::bind_addr(&addr)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn bind_abstract(_name: &str) -> io::Result<UnixListener> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "abstract unix sockets are linux-only",
    ))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_uid(fd: BorrowedFd<'_>) -> Option<u32> {
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
    // SAFETY: `cred` and `len` are valid for writes and sized for SO_PEERCRED.
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            ptr::from_mut(&mut cred).cast(),
            &mut len,
        )
    };
    (rc == 0).then_some(cred.uid)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_uid(fd: BorrowedFd<'_>) -> Option<u32> {
    let mut uid: libc::uid_t = 0;
    let mut gid: libc::gid_t = 0;
    // SAFETY: out-pointers are valid locals.
    let rc = unsafe { libc::getpeereid(fd.as_raw_fd(), &mut uid, &mut gid) };
    (rc == 0).then_some(uid)
}

fn cmsg_space(fd_count: usize) -> usize {
    let payload = u32::try_from(fd_count * mem::size_of::<RawFd>()).unwrap_or(u32::MAX);
    // SAFETY: pure arithmetic macro.
    unsafe { libc::CMSG_SPACE(payload) as usize }
}

fn sendmsg_rights(fd: RawFd, buf: &[u8], fds: &[RawFd]) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr().cast_mut().cast(),
        iov_len: buf.len(),
    };
    // u64 storage keeps the control buffer aligned for cmsghdr.
    let space = cmsg_space(fds.len());
    let mut control = vec![0u64; space.div_ceil(mem::size_of::<u64>())];

    // SAFETY: zeroed msghdr is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    if !fds.is_empty() {
        let payload = mem::size_of_val(fds);
        msg.msg_control = control.as_mut_ptr().cast();
        msg.msg_controllen = space as _;
        // SAFETY: control holds CMSG_SPACE(payload) bytes, so the first header
        // and its data area are in bounds.
        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&msg);
            (*cmsg).cmsg_level = libc::SOL_SOCKET;
            (*cmsg).cmsg_type = libc::SCM_RIGHTS;
            (*cmsg).cmsg_len = libc::CMSG_LEN(u32::try_from(payload).unwrap_or(u32::MAX)) as _;
            ptr::copy_nonoverlapping(fds.as_ptr(), libc::CMSG_DATA(cmsg).cast::<RawFd>(), fds.len());
        }
    }

    // SAFETY: msg points at live iov/control buffers for the call duration.
    let sent = unsafe { libc::sendmsg(fd, &msg, send_flags()) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent.unsigned_abs())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const fn send_flags() -> libc::c_int {
    libc::MSG_NOSIGNAL
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const fn send_flags() -> libc::c_int {
    0
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const fn recv_flags() -> libc::c_int {
    libc::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const fn recv_flags() -> libc::c_int {
    0
}

fn recvmsg_rights(fd: RawFd, buf: &mut [u8], fds: &mut Vec<OwnedFd>) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr().cast(),
        iov_len: buf.len(),
    };
    let space = cmsg_space(MAX_FDS_PER_READ);
    let mut control = vec![0u64; space.div_ceil(mem::size_of::<u64>())];

    // SAFETY: zeroed msghdr is a valid empty header.
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr().cast();
    msg.msg_controllen = space as _;

    let received = loop {
        // SAFETY: msg points at live iov/control buffers for the call duration.
        let n = unsafe { libc::recvmsg(fd, &mut msg, recv_flags()) };
        if n >= 0 {
            break n.unsigned_abs();
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    };

    // SAFETY: walking headers the kernel wrote into `control`; CMSG_NXTHDR
    // bounds-checks against msg_controllen.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let header = libc::CMSG_LEN(0) as usize;
                let count = ((*cmsg).cmsg_len as usize).saturating_sub(header) / mem::size_of::<RawFd>();
                let data = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                for i in 0..count {
                    fds.push(OwnedFd::from_raw_fd(ptr::read_unaligned(data.add(i))));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    if msg.msg_flags & libc::MSG_CTRUNC != 0 {
        return Err(io::Error::other("descriptor list truncated"));
    }
    Ok(received)
}
