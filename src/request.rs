//! Incremental HTTP request parser.
//!
//! The parser consumes CRLF-terminated lines straight out of a connection's
//! [`ByteBuffer`]. When a full line is not yet available it returns
//! [`ParseStatus::Incomplete`] without consuming anything, and the next call
//! resumes in the same state once more bytes have been read.

use crate::buffer::ByteBuffer;
use crate::credentials::CredentialStore;
use crate::error::{ServerError, ServerResult};
use crate::http::{
    Method, ERROR_PAGE, FORM_URLENCODED, HTML_ROUTES, LOGIN_PAGE, REGISTER_PAGE, WELCOME_PAGE,
};
use std::collections::HashMap;

/// Where the parser is within the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    RequestLine,
    Headers,
    Body,
    Done,
}

/// Result of feeding buffered bytes to the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are needed; nothing partial was consumed
    Incomplete,
    /// The request is fully parsed
    Complete,
}

/// A request being parsed, and once [`ParseState::Done`], the parsed request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    state: ParseState,
    method: Option<Method>,
    path: String,
    version: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    form: HashMap<String, String>,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        Self {
            state: ParseState::RequestLine,
            method: None,
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            form: HashMap::new(),
        }
    }

    /// Reset the parser for a new request
    pub fn reset(&mut self) {
        self.state = ParseState::RequestLine;
        self.method = None;
        self.path.clear();
        self.version.clear();
        self.headers.clear();
        self.body.clear();
        self.form.clear();
    }

    /// Advance through as much of `buf` as is available.
    ///
    /// A malformed request line is a [`ServerError::Protocol`]; the caller
    /// answers 400 and closes. In the body state every readable byte is taken
    /// as the body, regardless of `Content-Length`.
    pub fn parse(&mut self, buf: &mut ByteBuffer) -> ServerResult<ParseStatus> {
        while self.state != ParseState::Done {
            if self.state == ParseState::Body {
                if buf.readable() == 0 && self.declared_length() > 0 {
                    return Ok(ParseStatus::Incomplete);
                }
                self.body = buf.retrieve_all();
                self.parse_form();
                self.state = ParseState::Done;
                break;
            }

            let line_end = match buf.find_crlf() {
                Some(pos) => pos,
                None => return Ok(ParseStatus::Incomplete),
            };
            let line = String::from_utf8_lossy(&buf.peek()[..line_end]).into_owned();

            match self.state {
                ParseState::RequestLine => {
                    self.parse_request_line(&line)?;
                    self.normalize_path();
                    self.state = ParseState::Headers;
                }
                ParseState::Headers => {
                    if line.is_empty() {
                        self.state = match self.method {
                            Some(Method::Post) => ParseState::Body,
                            _ => ParseState::Done,
                        };
                    } else {
                        self.parse_header(&line);
                    }
                }
                ParseState::Body | ParseState::Done => {}
            }

            buf.advance(line_end + 2)?;
        }

        Ok(ParseStatus::Complete)
    }

    /// Route `/register.html` and `/login.html` form posts through `store`,
    /// rewriting the path to the welcome or error page
    pub fn apply_form_routes(&mut self, store: &dyn CredentialStore) {
        if self.method != Some(Method::Post) || !self.is_form() {
            return;
        }

        let is_login = match self.path.as_str() {
            LOGIN_PAGE => true,
            REGISTER_PAGE => false,
            _ => return,
        };

        let username = self.form_value("username").unwrap_or_default();
        let password = self.form_value("password").unwrap_or_default();

        self.path = if store.verify(username, password, is_login) {
            WELCOME_PAGE.to_string()
        } else {
            ERROR_PAGE.to_string()
        };
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == ParseState::Done
    }

    pub fn method(&self) -> Option<Method> {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Header value, matching the name case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decoded url-encoded form field
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(String::as_str)
    }

    /// Keep-alive only when the client sent exactly `Connection: keep-alive`
    pub fn is_keep_alive(&self) -> bool {
        self.header("Connection") == Some("keep-alive")
    }

    fn parse_request_line(&mut self, line: &str) -> ServerResult<()> {
        let invalid = || ServerError::Protocol(format!("Invalid request line: {:?}", line));

        let mut parts = line.split(' ');
        let (method, path, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(p), Some(v), None) => (m, p, v),
            _ => return Err(invalid()),
        };

        if path.is_empty() || path.chars().any(char::is_whitespace) || !is_http_version(version) {
            return Err(invalid());
        }

        self.method = Some(Method::parse(method)?);
        self.path = path.to_string();
        self.version = version.to_string();
        Ok(())
    }

    fn normalize_path(&mut self) {
        if self.path == "/" {
            self.path = "/index.html".to_string();
        } else if HTML_ROUTES.contains(&self.path.as_str()) {
            self.path.push_str(".html");
        }
    }

    fn parse_header(&mut self, line: &str) {
        // Lines without a colon are ignored
        if let Some((key, value)) = line.split_once(':') {
            // Last write wins, whatever the case of the earlier key
            self.headers.retain(|k, _| !k.eq_ignore_ascii_case(key));
            self.headers
                .insert(key.to_string(), value.trim_start().to_string());
        }
    }

    fn declared_length(&self) -> usize {
        self.header("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    fn is_form(&self) -> bool {
        self.header("Content-Type")
            .map(|v| v.eq_ignore_ascii_case(FORM_URLENCODED))
            .unwrap_or(false)
    }

    fn parse_form(&mut self) {
        if !self.is_form() || self.body.is_empty() {
            return;
        }
        self.form = parse_urlencoded(&self.body);
    }
}

/// `HTTP/<digit>.<digit>`
fn is_http_version(version: &str) -> bool {
    match version.strip_prefix("HTTP/").map(str::as_bytes) {
        Some([major, b'.', minor]) => major.is_ascii_digit() && minor.is_ascii_digit(),
        _ => false,
    }
}

/// Decode an `application/x-www-form-urlencoded` body
pub fn parse_urlencoded(body: &[u8]) -> HashMap<String, String> {
    body.split(|&b| b == b'&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.iter().position(|&b| b == b'=') {
            Some(eq) => (percent_decode(&pair[..eq]), percent_decode(&pair[eq + 1..])),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// Decode `%XX` escapes and `+` as space. Malformed escapes are kept verbatim.
pub fn percent_decode(input: &[u8]) -> String {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < input.len() => {
                match (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 2;
                    }
                    _ => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
