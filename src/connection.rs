use crate::buffer::ByteBuffer;
use crate::credentials::CredentialStore;
use crate::http::Status;
use crate::request::{HttpRequest, ParseStatus};
use crate::response::HttpResponse;
use crate::static_files::ResourceProvider;
use log::{debug, warn};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;

/// Collaborators shared by every connection
pub struct HttpContext {
    pub resource_dir: PathBuf,
    pub resources: Arc<dyn ResourceProvider>,
    pub credentials: Arc<dyn CredentialStore>,
}

impl HttpContext {
    pub fn new(
        resource_dir: impl Into<PathBuf>,
        resources: Arc<dyn ResourceProvider>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            resources,
            credentials,
        }
    }
}

/// What a connection is waiting for after a read or write step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Re-arm for readability
    Read,
    /// Re-arm for writability, a response is (partly) pending
    Write,
    /// Tear the connection down
    Close,
}

/// One client socket with its buffers, parser and in-flight response.
///
/// The response is written from two regions: the serialized status line and
/// headers in `write_buf`, then the resource body starting at `file_offset`.
pub struct Connection<S: AsRawFd = TcpStream> {
    stream: Option<S>,
    fd: RawFd,
    token: u64,
    peer_addr: SocketAddr,
    ctx: Arc<HttpContext>,

    read_buf: ByteBuffer,
    write_buf: ByteBuffer,
    request: HttpRequest,
    response: HttpResponse,
    file_offset: usize,

    keep_alive: bool,
    writing: bool,
    closed: bool,
}

impl<S: AsRawFd> Connection<S> {
    /// Wrap an accepted, non-blocking stream
    pub fn new(
        stream: S,
        peer_addr: SocketAddr,
        token: u64,
        ctx: Arc<HttpContext>,
        buffer_size: usize,
    ) -> Self {
        Self {
            fd: stream.as_raw_fd(),
            stream: Some(stream),
            token,
            peer_addr,
            ctx,
            read_buf: ByteBuffer::new(buffer_size),
            write_buf: ByteBuffer::new(buffer_size),
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            file_offset: 0,
            keep_alive: false,
            writing: false,
            closed: false,
        }
    }

    /// Drain the socket, then try to turn what was read into a response
    pub fn handle_readable(&mut self) -> Next {
        if self.closed {
            return Next::Close;
        }

        loop {
            match self.read_buf.read_fd(self.fd) {
                Ok(0) => {
                    debug!("Peer {} closed the connection", self.peer_addr);
                    return Next::Close;
                }
                Ok(_) => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Error reading from {}: {}", self.peer_addr, e);
                    return Next::Close;
                }
            }
        }

        self.process()
    }

    /// Parse buffered input and, once a request is complete, stage its
    /// response. Returns [`Next::Read`] while more input is needed.
    pub fn process(&mut self) -> Next {
        // A finished request left over from the previous cycle
        if !self.writing && self.request.is_complete() {
            self.request.reset();
        }

        if self.read_buf.readable() == 0 {
            return Next::Read;
        }

        let ctx = self.ctx.clone();
        match self.request.parse(&mut self.read_buf) {
            Ok(ParseStatus::Incomplete) => return Next::Read,
            Ok(ParseStatus::Complete) => {
                self.request.apply_form_routes(ctx.credentials.as_ref());
                self.response.prepare(
                    ctx.resources.as_ref(),
                    &ctx.resource_dir,
                    self.request.path(),
                    self.request.is_keep_alive(),
                    Status::Ok,
                );
            }
            Err(e) => {
                warn!("Bad request from {}: {}", self.peer_addr, e);
                self.read_buf.clear();
                self.response.prepare(
                    ctx.resources.as_ref(),
                    &ctx.resource_dir,
                    self.request.path(),
                    false,
                    Status::BadRequest,
                );
            }
        }

        self.keep_alive = self.response.keep_alive();
        self.write_buf.clear();
        self.file_offset = 0;
        self.response.make_response(&mut self.write_buf);
        Next::Write
    }

    /// Push the pending response out until it is flushed or the socket is full
    pub fn handle_writable(&mut self) -> Next {
        if self.closed {
            return Next::Close;
        }

        while self.to_write_bytes() > 0 {
            match self.write_regions() {
                Ok(n) => self.advance_regions(n),
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    self.writing = true;
                    return Next::Write;
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Error writing to {}: {}", self.peer_addr, e);
                    return Next::Close;
                }
            }
        }

        self.writing = false;
        self.response.unmap_file();

        if !self.keep_alive {
            return Next::Close;
        }

        self.request.reset();
        // The client may already have sent the next request
        if self.read_buf.readable() > 0 {
            return self.process();
        }
        Next::Read
    }

    /// Release the socket and any mapped body. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.response.unmap_file();
        self.read_buf.clear();
        self.write_buf.clear();
        self.file_offset = 0;
        self.stream = None;
    }

    /// Bytes of the current response not yet written
    pub fn to_write_bytes(&self) -> usize {
        self.write_buf.readable() + self.file_remaining().len()
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn stream(&self) -> Option<&S> {
        self.stream.as_ref()
    }

    fn file_remaining(&self) -> &[u8] {
        self.response
            .file()
            .map(|file| &file[self.file_offset.min(file.len())..])
            .unwrap_or(&[])
    }

    /// One gather write over the header region and the file region
    fn write_regions(&self) -> io::Result<usize> {
        let head = self.write_buf.peek();
        let file = self.file_remaining();

        let iov = [
            libc::iovec {
                iov_base: head.as_ptr() as *mut libc::c_void,
                iov_len: head.len(),
            },
            libc::iovec {
                iov_base: file.as_ptr() as *mut libc::c_void,
                iov_len: file.len(),
            },
        ];
        let count = if file.is_empty() { 1 } else { 2 };

        let n = unsafe { libc::writev(self.fd, iov.as_ptr(), count) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    /// The header region drains before the file region starts
    fn advance_regions(&mut self, written: usize) {
        let from_head = written.min(self.write_buf.readable());
        // from_head never exceeds what is readable
        let _ = self.write_buf.advance(from_head);
        self.file_offset += written - from_head;
    }
}
