use crate::error::{ServerError, ServerResult};

/// Extensionless routes that are served from `<route>.html`
pub const HTML_ROUTES: &[&str] = &["/index", "/register", "/login", "/welcome", "/video", "/picture"];

/// Form endpoints, matched after route normalization
pub const REGISTER_PAGE: &str = "/register.html";
pub const LOGIN_PAGE: &str = "/login.html";

pub const WELCOME_PAGE: &str = "/welcome.html";
pub const ERROR_PAGE: &str = "/error.html";

pub const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

const MIME_TYPES: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("json", "application/json"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("txt", "text/plain"),
    ("xml", "application/xml"),
    ("pdf", "application/pdf"),
];

/// HTTP status codes the server emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 200,
    BadRequest = 400,
    NotFound = 404,
    InternalServerError = 500,
}

impl Status {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Get the text description for this status code
    pub fn as_str(&self) -> &'static str {
        match *self {
            Status::Ok => "OK",
            Status::BadRequest => "Bad Request",
            Status::NotFound => "Not Found",
            Status::InternalServerError => "Internal Server Error",
        }
    }
}

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Parse a method from a string
    pub fn parse(s: &str) -> ServerResult<Self> {
        match s {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            _ => Err(ServerError::Protocol(format!("Unsupported method: {}", s))),
        }
    }

    /// Convert the method to a string
    pub fn as_str(&self) -> &'static str {
        match *self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// MIME type for a request path, by extension. Unknown types are `text/plain`.
pub fn content_type(path: &str) -> &'static str {
    let ext = match path.rfind('.') {
        Some(pos) => &path[pos + 1..],
        None => return "text/plain",
    };

    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or("text/plain")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_lookup() {
        assert_eq!(content_type("/index.html"), "text/html");
        assert_eq!(content_type("/img/cat.jpeg"), "image/jpeg");
        assert_eq!(content_type("/app.js"), "application/javascript");
        assert_eq!(content_type("/archive.tar"), "text/plain");
        assert_eq!(content_type("/README"), "text/plain");
    }

    #[test]
    fn test_method_parse() {
        assert_eq!(Method::parse("GET").unwrap(), Method::Get);
        assert_eq!(Method::parse("POST").unwrap(), Method::Post);
        assert!(Method::parse("PUT").is_err());
        assert!(Method::parse("get").is_err());
    }
}
