//! Thin wrapper over Linux `epoll`.
//!
//! Client sockets are registered edge-triggered and one-shot: after an
//! event fires for a descriptor, it stays silent until [`Poller::modify`]
//! re-arms it. The poller also owns an `eventfd` so other threads can
//! interrupt a blocking [`Poller::wait`].

use crate::error::{ServerError, ServerResult};
use std::io::{self, ErrorKind};
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Token reserved for the internal wake-up descriptor
const WAKE_TOKEN: u64 = u64::MAX;

/// Set of readiness conditions a descriptor is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u32);

impl Interest {
    pub const READABLE: Interest = Interest(libc::EPOLLIN as u32);
    pub const WRITABLE: Interest = Interest(libc::EPOLLOUT as u32);
    pub const PEER_CLOSED: Interest = Interest(libc::EPOLLRDHUP as u32);
    pub const EDGE: Interest = Interest(libc::EPOLLET as u32);
    pub const ONESHOT: Interest = Interest(libc::EPOLLONESHOT as u32);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Interest) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// One readiness notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: u64,
    pub readiness: u32,
}

impl Event {
    pub fn is_readable(&self) -> bool {
        self.readiness & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.readiness & libc::EPOLLOUT as u32 != 0
    }

    /// Both directions are gone or the socket is in an error state
    pub fn is_hangup(&self) -> bool {
        self.readiness & (libc::EPOLLERR | libc::EPOLLHUP) as u32 != 0
    }

    /// The peer shut down its writing half. Anything it sent before that
    /// is still readable.
    pub fn is_read_closed(&self) -> bool {
        self.readiness & libc::EPOLLRDHUP as u32 != 0
    }
}

/// Reusable storage for a batch of events returned by [`Poller::wait`]
pub struct Events {
    inner: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Event at `index`, or `None` past the end of the batch
    pub fn get(&self, index: usize) -> Option<Event> {
        if index >= self.len {
            return None;
        }
        let raw = self.inner[index];
        Some(Event {
            token: raw.u64,
            readiness: raw.events,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        (0..self.len).filter_map(move |i| self.get(i))
    }
}

/// An `epoll` instance plus its wake-up `eventfd`
pub struct Poller {
    epoll_fd: RawFd,
    wake_fd: RawFd,
}

impl Poller {
    /// Create a new poller
    pub fn new() -> ServerResult<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(ServerError::Poller(format!(
                "epoll_create1 failed: {}",
                io::Error::last_os_error()
            )));
        }

        let wake_fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wake_fd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll_fd) };
            return Err(ServerError::Poller(format!("eventfd failed: {}", err)));
        }

        let poller = Self { epoll_fd, wake_fd };
        poller
            .ctl(libc::EPOLL_CTL_ADD, wake_fd, WAKE_TOKEN, Interest::READABLE)
            .map_err(|e| ServerError::Poller(format!("failed to register wake fd: {}", e)))?;

        Ok(poller)
    }

    /// Start watching `fd`, reporting events under `token`
    pub fn register(&self, fd: RawFd, token: u64, interest: Interest) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
            .map_err(ServerError::Io)
    }

    /// Replace the interest set of `fd`. This is how one-shot descriptors are re-armed.
    pub fn modify(&self, fd: RawFd, token: u64, interest: Interest) -> ServerResult<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
            .map_err(ServerError::Io)
    }

    /// Stop watching `fd`
    pub fn deregister(&self, fd: RawFd) -> ServerResult<()> {
        let ret = unsafe {
            libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if ret < 0 {
            return Err(ServerError::Io(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Block until at least one descriptor is ready, the timeout expires or
    /// [`Poller::wake`] is called. `None` waits indefinitely.
    ///
    /// Wake-ups are consumed internally and never appear in `events`.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> ServerResult<usize> {
        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let n = unsafe {
            libc::epoll_wait(
                self.epoll_fd,
                events.inner.as_mut_ptr(),
                events.inner.len() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            // Ignore EINTR as it's just a signal interruption
            if err.kind() == ErrorKind::Interrupted {
                events.len = 0;
                return Ok(0);
            }
            return Err(ServerError::Poller(format!("epoll_wait failed: {}", err)));
        }

        // Drop the wake token from the batch, keeping order
        let mut kept = 0;
        for i in 0..n as usize {
            let token = events.inner[i].u64;
            if token == WAKE_TOKEN {
                self.drain_wake();
                continue;
            }
            events.inner[kept] = events.inner[i];
            kept += 1;
        }
        events.len = kept;

        Ok(kept)
    }

    /// Interrupt a concurrent or the next call to [`Poller::wait`]
    pub fn wake(&self) -> io::Result<()> {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(self.wake_fd, &one as *const u64 as *const libc::c_void, 8)
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wake-up is already pending
            if err.kind() != ErrorKind::WouldBlock {
                return Err(err);
            }
        }
        Ok(())
    }

    fn drain_wake(&self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(self.wake_fd, &mut buf as *mut u64 as *mut libc::c_void, 8);
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.bits(),
            u64: token,
        };

        let ret = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event as *mut _) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_fd);
            libc::close(self.epoll_fd);
        }
    }
}
