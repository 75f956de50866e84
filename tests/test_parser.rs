use kubelet_proxy::http::body::BodyFraming;
use kubelet_proxy::http::parser::{ParseError, find_headers_end, parse_request_head, parse_response_head};

#[test]
fn test_parse_get_with_query() {
    let req = b"GET /metrics?format=text HTTP/1.1\r\nHost: node\r\nAccept: */*\r\n\r\n";

    let (parsed, consumed) = parse_request_head(req).unwrap();

    assert_eq!(parsed.method, "GET");
    assert_eq!(parsed.target, "/metrics?format=text");
    assert_eq!(parsed.version, "HTTP/1.1");
    assert_eq!(parsed.headers.len(), 2);
    assert_eq!(consumed, req.len());
}

#[test]
fn test_parse_extension_method() {
    let (parsed, _) = parse_request_head(b"PROPFIND /x HTTP/1.1\r\n\r\n").unwrap();
    assert_eq!(parsed.method, "PROPFIND");
}

#[test]
fn test_parse_header_value_whitespace_trimmed() {
    let (parsed, _) = parse_request_head(b"GET / HTTP/1.1\r\nX-Test:   spaced  \r\n\r\n").unwrap();
    assert_eq!(parsed.header("x-test"), Some("spaced"));
}

#[test]
fn test_parse_repeated_headers_kept() {
    let (parsed, _) =
        parse_request_head(b"GET / HTTP/1.1\r\nAccept: a\r\nAccept: b\r\n\r\n").unwrap();
    assert_eq!(parsed.headers.get_all("Accept").collect::<Vec<_>>(), vec!["a", "b"]);
}

#[test]
fn test_parse_incomplete_head() {
    assert_eq!(
        parse_request_head(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap_err(),
        ParseError::Incomplete
    );
}

#[test]
fn test_parse_invalid_request_line() {
    assert_eq!(
        parse_request_head(b"GET /\r\n\r\n").unwrap_err(),
        ParseError::InvalidRequest
    );
    assert_eq!(
        parse_request_head(b"GET / HTTP/2.0\r\n\r\n").unwrap_err(),
        ParseError::InvalidRequest
    );
}

#[test]
fn test_parse_invalid_method() {
    assert_eq!(
        parse_request_head(b"G(T / HTTP/1.1\r\n\r\n").unwrap_err(),
        ParseError::InvalidMethod
    );
}

#[test]
fn test_parse_header_without_colon() {
    assert_eq!(
        parse_request_head(b"GET / HTTP/1.1\r\nBroken header\r\n\r\n").unwrap_err(),
        ParseError::InvalidHeader
    );
}

#[test]
fn test_parse_response_with_multiword_reason() {
    let (head, _) =
        parse_response_head(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n").unwrap();
    assert_eq!(head.status, 404);
    assert_eq!(head.reason, "Not Found");
    assert_eq!(head.headers.get("content-length"), Some("0"));
}

#[test]
fn test_parse_response_bad_status() {
    assert_eq!(
        parse_response_head(b"HTTP/1.1 20 OK\r\n\r\n").unwrap_err(),
        ParseError::InvalidStatus
    );
    assert_eq!(
        parse_response_head(b"SPDY/3 200 OK\r\n\r\n").unwrap_err(),
        ParseError::InvalidStatus
    );
}

#[test]
fn test_find_headers_end() {
    assert_eq!(find_headers_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
    assert_eq!(find_headers_end(b"GET / HTTP/1.1\r\n"), None);
}

#[test]
fn test_request_framing() {
    let (chunked, _) =
        parse_request_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n").unwrap();
    assert_eq!(BodyFraming::for_request(&chunked.headers), Ok(BodyFraming::Chunked));

    let (sized, _) = parse_request_head(b"POST / HTTP/1.1\r\nContent-Length: 12\r\n\r\n").unwrap();
    assert_eq!(BodyFraming::for_request(&sized.headers), Ok(BodyFraming::Length(12)));

    let (gzip, _) =
        parse_request_head(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\n").unwrap();
    assert!(BodyFraming::for_request(&gzip.headers).is_err());
}

#[test]
fn test_response_framing() {
    let (no_length, _) = parse_response_head(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
    assert_eq!(BodyFraming::for_response("GET", &no_length), BodyFraming::UntilClose);
    assert_eq!(BodyFraming::for_response("HEAD", &no_length), BodyFraming::Empty);

    let (not_modified, _) = parse_response_head(b"HTTP/1.1 304 Not Modified\r\n\r\n").unwrap();
    assert_eq!(BodyFraming::for_response("GET", &not_modified), BodyFraming::Empty);
}
