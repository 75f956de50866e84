use crate::http::headers::Headers;

/// HTTP status codes the proxy produces on its own.
///
/// Statuses relayed from the backend never go through this type; they are
/// carried verbatim in [`ResponseHead`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 431 Request Header Fields Too Large
    RequestHeaderFieldsTooLarge,
    /// 502 Bad Gateway
    BadGateway,
    /// 504 Gateway Timeout
    GatewayTimeout,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use kubelet_proxy::http::response::StatusCode;
    /// assert_eq!(StatusCode::MethodNotAllowed.as_u16(), 405);
    /// assert_eq!(StatusCode::BadGateway.as_u16(), 502);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestHeaderFieldsTooLarge => 431,
            StatusCode::BadGateway => 502,
            StatusCode::GatewayTimeout => 504,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::GatewayTimeout => "Gateway Timeout",
        }
    }
}

/// A complete, locally generated HTTP response.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Vec<u8>,
}

/// Builder for constructing local responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::NotFound)
///     .header("Content-Type", "text/plain; charset=utf-8")
///     .body(b"404 page not found\n".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Adds or replaces a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header based on body size if not already present.
    pub fn build(mut self) -> Response {
        if !self.headers.contains("Content-Length") {
            self.headers.append("Content-Length", self.body.len().to_string());
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// A plain-text response carrying `message` followed by a newline.
    pub fn text(status: StatusCode, message: &str) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain; charset=utf-8")
            .header("X-Content-Type-Options", "nosniff")
            .body(format!("{}\n", message).into_bytes())
            .build()
    }

    pub fn method_not_allowed() -> Self {
        Self::text(StatusCode::MethodNotAllowed, "Method Not Allowed")
    }

    pub fn not_found() -> Self {
        Self::text(StatusCode::NotFound, "404 page not found")
    }

    pub fn bad_request() -> Self {
        Self::text(StatusCode::BadRequest, "400 Bad Request")
    }

    pub fn header_too_large() -> Self {
        Self::text(
            StatusCode::RequestHeaderFieldsTooLarge,
            "431 Request Header Fields Too Large",
        )
    }

    pub fn bad_gateway() -> Self {
        Self::text(StatusCode::BadGateway, "502 Bad Gateway")
    }

    pub fn gateway_timeout() -> Self {
        Self::text(StatusCode::GatewayTimeout, "504 Gateway Timeout")
    }

    /// Marks the response as the last one on its connection.
    pub fn with_close(mut self) -> Self {
        self.headers.set("Connection", "close");
        self
    }

    /// Tells an HTTP/1.0 client that the connection stays open.
    pub fn with_keep_alive(mut self) -> Self {
        self.headers.set("Connection", "keep-alive");
        self
    }
}

/// The status line and headers of a response received from the backend.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    /// Interim responses other than 101 precede the final response.
    pub fn is_informational(&self) -> bool {
        (100..200).contains(&self.status) && self.status != 101
    }

    pub fn is_switching_protocols(&self) -> bool {
        self.status == 101
    }

    /// True if the backend intends to close the connection after this response.
    pub fn wants_close(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return true;
        }
        self.version.eq_ignore_ascii_case("HTTP/1.0")
            && !self.headers.has_token("Connection", "keep-alive")
    }
}
