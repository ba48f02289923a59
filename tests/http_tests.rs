use edge_http::buffer::ByteBuffer;
use edge_http::credentials::CredentialStore;
use edge_http::http::{Method, Status};
use edge_http::request::{HttpRequest, ParseState, ParseStatus};
use edge_http::response::{HttpResponse, ERROR_BODY};
use edge_http::static_files::MemoryResourceProvider;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Accepts exactly one username/password pair and counts calls
struct FixedStore {
    user: &'static str,
    password: &'static str,
    calls: AtomicUsize,
}

impl FixedStore {
    fn new(user: &'static str, password: &'static str) -> Self {
        Self { user, password, calls: AtomicUsize::new(0) }
    }
}

impl CredentialStore for FixedStore {
    fn verify(&self, username: &str, password: &str, _is_login: bool) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        username == self.user && password == self.password
    }
}

fn buffer_with(data: &[u8]) -> ByteBuffer {
    let mut buffer = ByteBuffer::new(64);
    buffer.append(data);
    buffer
}

fn parse_all(data: &[u8]) -> HttpRequest {
    let mut request = HttpRequest::new();
    let mut buffer = buffer_with(data);
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Complete);
    request
}

#[test]
fn test_http_parser_simple_get() {
    let request = parse_all(b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n");

    assert_eq!(request.method(), Some(Method::Get));
    assert_eq!(request.path(), "/index.html");
    assert_eq!(request.version(), "HTTP/1.1");
    assert_eq!(request.header("host"), Some("example.com"));
    assert!(request.body().is_empty());
    assert!(!request.is_keep_alive());
}

#[test]
fn test_root_and_routes_are_normalized() {
    assert_eq!(parse_all(b"GET / HTTP/1.1\r\n\r\n").path(), "/index.html");
    assert_eq!(parse_all(b"GET /picture HTTP/1.1\r\n\r\n").path(), "/picture.html");
    assert_eq!(parse_all(b"GET /login HTTP/1.1\r\n\r\n").path(), "/login.html");
    assert_eq!(parse_all(b"GET /other HTTP/1.1\r\n\r\n").path(), "/other");
}

#[test]
fn test_request_line_split_across_reads() {
    let mut request = HttpRequest::new();
    let mut buffer = buffer_with(b"GET /index");

    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Incomplete);
    assert_eq!(request.state(), ParseState::RequestLine);
    // Partial line is left in place
    assert_eq!(buffer.peek(), b"GET /index");

    buffer.append(b" HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Complete);

    let whole = parse_all(b"GET /index HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    assert_eq!(request.path(), whole.path());
    assert_eq!(request.method(), whole.method());
    assert_eq!(request.headers(), whole.headers());
    assert_eq!(buffer.readable(), 0);
}

#[test]
fn test_headers_split_across_reads() {
    let mut request = HttpRequest::new();
    let mut buffer = buffer_with(b"GET / HTTP/1.1\r\nConnec");
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Incomplete);
    assert_eq!(request.state(), ParseState::Headers);

    buffer.append(b"tion: keep-alive\r\n");
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Incomplete);
    buffer.append(b"\r\n");
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Complete);
    assert!(request.is_keep_alive());
}

#[test]
fn test_keep_alive_requires_exact_value() {
    assert!(parse_all(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n").is_keep_alive());
    assert!(!parse_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").is_keep_alive());
    assert!(!parse_all(b"GET / HTTP/1.1\r\n\r\n").is_keep_alive());
}

#[test]
fn test_malformed_request_lines_are_rejected() {
    for line in [
        &b"GET /index.html\r\n\r\n"[..],
        b"GET  /index.html HTTP/1.1\r\n\r\n",
        b"PUT /index.html HTTP/1.1\r\n\r\n",
        b"GET /index.html FTP/1.1\r\n\r\n",
        b"GET /a b HTTP/1.1\r\n\r\n",
    ] {
        let mut request = HttpRequest::new();
        let mut buffer = buffer_with(line);
        assert!(request.parse(&mut buffer).is_err(), "{:?}", String::from_utf8_lossy(line));
    }
}

#[test]
fn test_post_body_and_form_fields() {
    let request = parse_all(
        b"POST /login HTTP/1.1\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\
          Content-Length: 30\r\n\r\n\
          username=al%20ice&password=p+w",
    );

    assert_eq!(request.method(), Some(Method::Post));
    assert_eq!(request.body(), b"username=al%20ice&password=p+w");
    assert_eq!(request.form_value("username"), Some("al ice"));
    assert_eq!(request.form_value("password"), Some("p w"));
}

#[test]
fn test_post_waits_for_body_bytes() {
    let mut request = HttpRequest::new();
    let mut buffer = buffer_with(b"POST /login HTTP/1.1\r\nContent-Length: 5\r\n\r\n");
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Incomplete);
    assert_eq!(request.state(), ParseState::Body);

    buffer.append(b"hello");
    assert_eq!(request.parse(&mut buffer).unwrap(), ParseStatus::Complete);
    assert_eq!(request.body(), b"hello");
}

#[test]
fn test_login_routes_to_welcome_or_error() {
    let body = b"POST /login HTTP/1.1\r\n\
                 Content-Type: application/x-www-form-urlencoded\r\n\r\n\
                 username=a&password=b";

    let accepting = FixedStore::new("a", "b");
    let mut request = parse_all(body);
    request.apply_form_routes(&accepting);
    assert_eq!(request.path(), "/welcome.html");

    let rejecting = FixedStore::new("a", "other");
    let mut request = parse_all(body);
    request.apply_form_routes(&rejecting);
    assert_eq!(request.path(), "/error.html");
    assert_eq!(rejecting.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_form_routes_ignore_get_and_other_paths() {
    let store = FixedStore::new("a", "b");

    let mut get = parse_all(b"GET /login HTTP/1.1\r\n\r\n");
    get.apply_form_routes(&store);
    assert_eq!(get.path(), "/login.html");

    let mut other = parse_all(
        b"POST /upload HTTP/1.1\r\n\
          Content-Type: application/x-www-form-urlencoded\r\n\r\n\
          username=a&password=b",
    );
    other.apply_form_routes(&store);
    assert_eq!(other.path(), "/upload");
    assert_eq!(store.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reset_clears_previous_request() {
    let mut request = parse_all(b"GET /video HTTP/1.1\r\nConnection: keep-alive\r\n\r\n");
    request.reset();
    assert_eq!(request.state(), ParseState::RequestLine);
    assert_eq!(request.path(), "");
    assert!(request.headers().is_empty());
    assert!(request.method().is_none());
}

fn render(response: &HttpResponse) -> String {
    let mut buffer = ByteBuffer::new(128);
    response.make_response(&mut buffer);
    String::from_utf8(buffer.retrieve_all()).unwrap()
}

#[test]
fn test_ok_response_headers() {
    let provider = MemoryResourceProvider::new().with_file("/index.html", b"<p>home</p>");
    let mut response = HttpResponse::new();
    response.prepare(&provider, Path::new("/srv"), "/index.html", true, Status::Ok);

    assert_eq!(response.status(), Status::Ok);
    assert!(response.keep_alive());
    assert_eq!(
        render(&response),
        "HTTP/1.1 200 OK\r\nConnection: keep-alive\r\n\
         Content-Type: text/html\r\nContent-Length: 11\r\n\r\n"
    );
    assert_eq!(response.file(), Some(&b"<p>home</p>"[..]));
    assert_eq!(response.file_len(), 11);
}

#[test]
fn test_missing_resource_is_404_and_closes() {
    let provider = MemoryResourceProvider::new();
    let mut response = HttpResponse::new();
    response.prepare(&provider, Path::new("/srv"), "/missing.html", true, Status::Ok);

    assert_eq!(response.status(), Status::NotFound);
    assert!(!response.keep_alive());
    assert!(response.file().is_none());

    let text = render(&response);
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\nConnection: close\r\n"));
    assert!(text.ends_with(ERROR_BODY));
}

#[test]
fn test_bad_request_response() {
    let provider = MemoryResourceProvider::new().with_file("/index.html", b"x");
    let mut response = HttpResponse::new();
    response.prepare(&provider, Path::new("/srv"), "/index.html", true, Status::BadRequest);

    assert_eq!(response.status(), Status::BadRequest);
    assert!(!response.keep_alive());
    let text = render(&response);
    assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\nConnection: close\r\n"));
    assert!(text.contains("Content-Type: text/html\r\n\r\n"));
}
