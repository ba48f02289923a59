use crate::error::{ServerError, ServerResult};
use std::io::{self, Write};
use std::os::unix::io::RawFd;

/// Size of the stack-local overflow region used by [`ByteBuffer::read_fd`]
const EXTRA_READ_SIZE: usize = 64 * 1024;

/// A growable byte buffer with separate read and write cursors.
///
/// Layout: `[prependable | readable | writable]` where
/// `0 <= read_pos <= write_pos <= data.len()`.
pub struct ByteBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl ByteBuffer {
    /// Create a new buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Bytes that can be written without growing or compacting
    pub fn writable(&self) -> usize {
        self.data.len() - self.write_pos
    }

    /// Bytes appended but not yet retrieved
    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes already retrieved in front of the readable region
    pub fn prependable(&self) -> usize {
        self.read_pos
    }

    /// Get the total capacity of the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Borrow the unread bytes
    pub fn peek(&self) -> &[u8] {
        &self.data[self.read_pos..self.write_pos]
    }

    /// Append a slice to the writable tail, growing or compacting first if needed
    pub fn append(&mut self, bytes: &[u8]) {
        self.ensure_writable(bytes.len());
        self.data[self.write_pos..self.write_pos + bytes.len()].copy_from_slice(bytes);
        self.write_pos += bytes.len();
    }

    pub fn append_str(&mut self, s: &str) {
        self.append(s.as_bytes());
    }

    /// Remove and return the first `len` unread bytes
    pub fn retrieve(&mut self, len: usize) -> ServerResult<Vec<u8>> {
        let out = self.peek().get(..len).map(<[u8]>::to_vec).ok_or_else(|| {
            ServerError::Buffer(format!(
                "Cannot retrieve {} bytes, only {} readable",
                len,
                self.readable()
            ))
        })?;
        self.consume(len);
        Ok(out)
    }

    /// Remove and return every unread byte
    pub fn retrieve_all(&mut self) -> Vec<u8> {
        let out = self.peek().to_vec();
        self.clear();
        out
    }

    /// Discard `len` unread bytes without copying them out
    pub fn advance(&mut self, len: usize) -> ServerResult<()> {
        if len > self.readable() {
            return Err(ServerError::Buffer(format!(
                "Cannot advance read position beyond write position ({} > {})",
                len,
                self.readable()
            )));
        }
        self.consume(len);
        Ok(())
    }

    /// Reset both cursors, dropping any unread bytes
    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Make room for at least `len` more bytes.
    ///
    /// Compacts the unread region to the front when the slack in front of it
    /// plus the writable tail is enough, otherwise grows storage to
    /// `write_pos + len`. The readable bytes are preserved either way.
    pub fn ensure_writable(&mut self, len: usize) {
        if self.writable() >= len {
            return;
        }

        if self.writable() + self.prependable() < len {
            self.data.resize(self.write_pos + len, 0);
        } else {
            let readable = self.readable();
            self.data.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = readable;
        }
    }

    /// Position of the first CRLF in the unread bytes
    pub fn find_crlf(&self) -> Option<usize> {
        self.peek().windows(2).position(|w| w == b"\r\n")
    }

    /// Perform a single scatter read from `fd`.
    ///
    /// The first region is the writable tail, the second a 64 KiB stack
    /// region whose contents are appended afterwards, so one call can take
    /// in more than the current capacity. Returns `Ok(0)` on end of stream;
    /// `WouldBlock` means nothing more is available right now.
    pub fn read_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let mut extra = [0u8; EXTRA_READ_SIZE];
        let writable = self.writable();

        let iov = [
            libc::iovec {
                iov_base: self.data[self.write_pos..].as_mut_ptr() as *mut libc::c_void,
                iov_len: writable,
            },
            libc::iovec {
                iov_base: extra.as_mut_ptr() as *mut libc::c_void,
                iov_len: extra.len(),
            },
        ];

        let n = unsafe { libc::readv(fd, iov.as_ptr(), iov.len() as libc::c_int) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        let n = n as usize;
        if n <= writable {
            self.write_pos += n;
        } else {
            self.write_pos = self.data.len();
            self.append(&extra[..n - writable]);
        }

        Ok(n)
    }

    /// Write the unread bytes to `fd` with a single `write` call
    pub fn write_fd(&mut self, fd: RawFd) -> io::Result<usize> {
        let readable = self.peek();
        let n = unsafe {
            libc::write(fd, readable.as_ptr() as *const libc::c_void, readable.len())
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        self.consume(n as usize);
        Ok(n as usize)
    }

    fn consume(&mut self, len: usize) {
        self.read_pos += len;

        // If we've read everything, reset positions
        if self.read_pos == self.write_pos {
            self.clear();
        }
    }
}

impl Default for ByteBuffer {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Write for ByteBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compaction_keeps_capacity() {
        let mut buffer = ByteBuffer::new(16);
        buffer.append(b"0123456789");
        buffer.advance(8).unwrap();

        // 6 writable + 8 prependable >= 10, so no growth
        buffer.ensure_writable(10);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.prependable(), 0);
        assert_eq!(buffer.peek(), b"89");
    }

    #[test]
    fn test_growth_targets_write_cursor_plus_len() {
        let mut buffer = ByteBuffer::new(8);
        buffer.append(b"abcdef");
        buffer.ensure_writable(10);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.peek(), b"abcdef");
    }

    #[test]
    fn test_find_crlf() {
        let mut buffer = ByteBuffer::new(32);
        buffer.append(b"GET / HTTP/1.1\r\n");
        assert_eq!(buffer.find_crlf(), Some(14));
        buffer.advance(16).unwrap();
        assert_eq!(buffer.find_crlf(), None);
    }
}
