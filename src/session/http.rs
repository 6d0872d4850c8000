//! Just enough HTTP/1.1 over TCP for the signaling contract and the public address
//! probe. One request per connection; `Connection: close` makes the response
//! EOF-delimited, which is also what lets the server hold a long-poll open.

use std::{
    fmt::Write as _,
    io::{self, Error, ErrorKind},
};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

pub(crate) struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs one request against `server` (a `host:port` string) and reads the whole
/// response. A `Some` body is sent as JSON.
pub(crate) async fn request(server: &str, method: &str, path: &str, body: Option<&str>) -> io::Result<HttpResponse> {
    let mut stream = TcpStream::connect(server).await?;

    let mut head = format!("{method} {path} HTTP/1.1\r\nHost: {server}\r\nConnection: close\r\n");
    if let Some(body) = body {
        let _ = write!(head, "Content-Type: application/json\r\nContent-Length: {}\r\n", body.len());
    }
    head.push_str("\r\n");

    stream.write_all(head.as_bytes()).await?;
    if let Some(body) = body {
        stream.write_all(body.as_bytes()).await?;
    }

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    parse_response(&response)
}

fn parse_response(response: &[u8]) -> io::Result<HttpResponse> {
    let header_end = response
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Response has no header/body separator"))?;

    let head = std::str::from_utf8(&response[..header_end])
        .map_err(|_| Error::new(ErrorKind::InvalidData, "Response headers are not valid UTF-8"))?;

    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "Response has no parseable status code"))?;

    Ok(HttpResponse {
        status,
        body: response[header_end + 4..].to_vec(),
    })
}
