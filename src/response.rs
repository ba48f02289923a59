use crate::buffer::ByteBuffer;
use crate::error::ResourceError;
use crate::http::Status;
use crate::static_files::{Resource, ResourceProvider};
use log::warn;
use std::io::Write;
use std::path::Path;

/// Body sent with every 4xx/5xx response
pub const ERROR_BODY: &str = "<html><body><h1>Something went wrong!</h1></body></html>";

/// Response for one request: status line and headers are serialized into a
/// [`ByteBuffer`], a 200 body stays in the resolved [`Resource`] and is
/// written from there.
pub struct HttpResponse {
    status: Status,
    keep_alive: bool,
    resource: Option<Resource>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self {
            status: Status::Ok,
            keep_alive: false,
            resource: None,
        }
    }

    /// Set up the response for `path`. For `Status::Ok` the resource is
    /// resolved through `provider`; a missing file becomes 404 and an
    /// unreadable one 500.
    ///
    /// Error responses always close the connection, even when the client
    /// asked for keep-alive. Their page is sent without `Content-Length`,
    /// so closing is the only thing that marks where it ends.
    pub fn prepare(
        &mut self,
        provider: &dyn ResourceProvider,
        root_dir: &Path,
        path: &str,
        keep_alive: bool,
        status: Status,
    ) {
        self.unmap_file();
        self.status = status;

        if status == Status::Ok {
            match provider.resolve(root_dir, path) {
                Ok(resource) => self.resource = Some(resource),
                Err(ResourceError::NotFound(_)) => self.status = Status::NotFound,
                Err(e) => {
                    warn!("Failed to load {}: {}", path, e);
                    self.status = Status::InternalServerError;
                }
            }
        }

        self.keep_alive = keep_alive && self.status == Status::Ok;
    }

    /// Serialize the status line, headers and, for error responses, the body
    pub fn make_response(&self, buf: &mut ByteBuffer) {
        // Writing into a ByteBuffer cannot fail
        let _ = write!(buf, "HTTP/1.1 {} {}\r\n", self.status.code(), self.status.as_str());
        let _ = write!(
            buf,
            "Connection: {}\r\n",
            if self.keep_alive { "keep-alive" } else { "close" }
        );

        match &self.resource {
            Some(resource) if self.status == Status::Ok => {
                let _ = write!(buf, "Content-Type: {}\r\n", resource.content_type());
                let _ = write!(buf, "Content-Length: {}\r\n\r\n", resource.len());
            }
            _ => {
                buf.append_str("Content-Type: text/html\r\n\r\n");
                buf.append_str(ERROR_BODY);
            }
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Body bytes to send after the serialized headers
    pub fn file(&self) -> Option<&[u8]> {
        self.resource
            .as_ref()
            .map(Resource::as_bytes)
            .filter(|bytes| !bytes.is_empty())
    }

    pub fn file_len(&self) -> usize {
        self.file().map_or(0, <[u8]>::len)
    }

    /// Release the resolved resource, unmapping it if it was mapped
    pub fn unmap_file(&mut self) {
        self.resource = None;
    }
}
