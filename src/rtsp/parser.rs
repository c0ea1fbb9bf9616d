//! RTSP message parser
//!
//! Incremental byte-wise state machine that turns a TCP byte stream into
//! complete requests and responses. The first token of a message decides
//! its kind: `RTSP/x.y` starts a response status line, anything else is a
//! request method. Body length comes from Content-Length. The parser
//! resets after every complete message, so pipelined messages parse back
//! to back.

use crate::error::RtspError;
use crate::rtsp::message::{RtspHeaders, RtspMessage, RtspRequest, RtspResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    FirstToken,
    Uri,
    RequestVersion,
    StatusCode,
    ReasonPhrase,
    FirstLineLf,
    HeaderStart,
    HeaderName,
    HeaderSpace,
    HeaderValue,
    HeaderLf,
    EndLf,
    Body,
}

/// What a parse run produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseStatus {
    /// More input needed.
    Incomplete,
    /// One complete message; the parser is reset for the next one.
    Complete(RtspMessage),
}

/// Incremental parser for one RTSP byte stream direction.
pub struct RtspParser {
    state: State,
    is_response: bool,
    token: String,
    method: String,
    uri: String,
    version: (u8, u8),
    status: u16,
    reason: String,
    header_name: String,
    header_value: String,
    headers: RtspHeaders,
    body: Vec<u8>,
    remaining_body: usize,
}

impl Default for RtspParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RtspParser {
    pub fn new() -> Self {
        Self {
            state: State::FirstToken,
            is_response: false,
            token: String::new(),
            method: String::new(),
            uri: String::new(),
            version: (1, 0),
            status: 0,
            reason: String::new(),
            header_name: String::new(),
            header_value: String::new(),
            headers: RtspHeaders::new(),
            body: Vec::new(),
            remaining_body: 0,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    /// Consumes bytes from `input`.
    ///
    /// Returns the parse status plus the number of bytes consumed. On
    /// `Complete`, the remainder of `input` belongs to the next message
    /// and must be fed again.
    pub fn parse(&mut self, input: &[u8]) -> (Result<ParseStatus, RtspError>, usize) {
        for (consumed, &byte) in input.iter().enumerate() {
            match self.consume(byte) {
                Ok(Some(message)) => {
                    self.reset();
                    return (Ok(ParseStatus::Complete(message)), consumed + 1);
                }
                Ok(None) => {}
                Err(e) => {
                    self.reset();
                    return (Err(e), consumed + 1);
                }
            }
        }
        (Ok(ParseStatus::Incomplete), input.len())
    }

    fn consume(&mut self, byte: u8) -> Result<Option<RtspMessage>, RtspError> {
        match self.state {
            State::FirstToken => {
                if byte == b' ' {
                    if self.token.is_empty() {
                        return Err(RtspError::BadMethod);
                    }
                    if let Some(version_digits) = self.token.strip_prefix("RTSP/") {
                        self.version = parse_version(version_digits)?;
                        self.is_response = true;
                        self.state = State::StatusCode;
                    } else {
                        if !self.token.bytes().all(is_token_char) {
                            return Err(RtspError::BadMethod);
                        }
                        self.method = std::mem::take(&mut self.token);
                        self.state = State::Uri;
                    }
                    self.token.clear();
                } else if is_ctl(byte) {
                    return Err(RtspError::BadMethod);
                } else {
                    self.token.push(byte as char);
                }
            }
            State::Uri => {
                if byte == b' ' {
                    if self.uri.is_empty() {
                        return Err(RtspError::BadUri);
                    }
                    self.state = State::RequestVersion;
                } else if is_ctl(byte) {
                    return Err(RtspError::BadUri);
                } else {
                    self.uri.push(byte as char);
                }
            }
            State::RequestVersion => {
                if byte == b'\r' {
                    let version_digits = self
                        .token
                        .strip_prefix("RTSP/")
                        .ok_or(RtspError::BadProtocol)?;
                    self.version = parse_version(version_digits)?;
                    self.token.clear();
                    self.state = State::FirstLineLf;
                } else if is_ctl(byte) {
                    return Err(RtspError::BadProtocol);
                } else {
                    self.token.push(byte as char);
                }
            }
            State::StatusCode => {
                if byte == b' ' {
                    self.status = self
                        .token
                        .parse()
                        .map_err(|_| RtspError::BadStatus)?;
                    self.token.clear();
                    self.state = State::ReasonPhrase;
                } else if byte.is_ascii_digit() {
                    self.token.push(byte as char);
                } else {
                    return Err(RtspError::BadStatus);
                }
            }
            State::ReasonPhrase => {
                if byte == b'\r' {
                    self.state = State::FirstLineLf;
                } else if is_ctl(byte) {
                    return Err(RtspError::BadStatus);
                } else {
                    self.reason.push(byte as char);
                }
            }
            State::FirstLineLf => {
                if byte != b'\n' {
                    return Err(RtspError::BadEndOfHeaders);
                }
                self.state = State::HeaderStart;
            }
            State::HeaderStart => {
                if byte == b'\r' {
                    self.state = State::EndLf;
                } else if is_token_char(byte) {
                    self.header_name.push(byte as char);
                    self.state = State::HeaderName;
                } else {
                    return Err(RtspError::BadHeader);
                }
            }
            State::HeaderName => {
                if byte == b':' {
                    self.state = State::HeaderSpace;
                } else if is_token_char(byte) {
                    self.header_name.push(byte as char);
                } else {
                    return Err(RtspError::BadHeader);
                }
            }
            State::HeaderSpace => {
                if byte == b' ' || byte == b'\t' {
                    // skip leading whitespace
                } else if byte == b'\r' {
                    self.finish_header();
                    self.state = State::HeaderLf;
                } else if is_ctl(byte) {
                    return Err(RtspError::BadHeader);
                } else {
                    self.header_value.push(byte as char);
                    self.state = State::HeaderValue;
                }
            }
            State::HeaderValue => {
                if byte == b'\r' {
                    self.finish_header();
                    self.state = State::HeaderLf;
                } else if is_ctl(byte) {
                    return Err(RtspError::BadHeader);
                } else {
                    self.header_value.push(byte as char);
                }
            }
            State::HeaderLf => {
                if byte != b'\n' {
                    return Err(RtspError::BadHeader);
                }
                self.state = State::HeaderStart;
            }
            State::EndLf => {
                if byte != b'\n' {
                    return Err(RtspError::BadEndOfHeaders);
                }
                self.remaining_body = self.headers.content_length();
                if self.remaining_body == 0 {
                    return Ok(Some(self.build_message()));
                }
                self.body.reserve(self.remaining_body);
                self.state = State::Body;
            }
            State::Body => {
                self.body.push(byte);
                self.remaining_body -= 1;
                if self.remaining_body == 0 {
                    return Ok(Some(self.build_message()));
                }
            }
        }
        Ok(None)
    }

    fn finish_header(&mut self) {
        let name = std::mem::take(&mut self.header_name);
        let value = std::mem::take(&mut self.header_value);
        self.headers.append(name, value);
    }

    fn build_message(&mut self) -> RtspMessage {
        if self.is_response {
            RtspMessage::Response(RtspResponse {
                status: self.status,
                reason: std::mem::take(&mut self.reason),
                version: self.version,
                headers: std::mem::take(&mut self.headers),
                body: std::mem::take(&mut self.body),
            })
        } else {
            RtspMessage::Request(RtspRequest {
                method: std::mem::take(&mut self.method),
                uri: std::mem::take(&mut self.uri),
                version: self.version,
                headers: std::mem::take(&mut self.headers),
                body: std::mem::take(&mut self.body),
            })
        }
    }
}

fn parse_version(digits: &str) -> Result<(u8, u8), RtspError> {
    let (major, minor) = digits.split_once('.').ok_or(RtspError::BadVersion)?;
    Ok((
        major.parse().map_err(|_| RtspError::BadVersion)?,
        minor.parse().map_err(|_| RtspError::BadVersion)?,
    ))
}

fn is_ctl(byte: u8) -> bool {
    byte < 32 || byte == 127
}

fn is_token_char(byte: u8) -> bool {
    if is_ctl(byte) || byte > 126 {
        return false;
    }
    !matches!(
        byte,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(parser: &mut RtspParser, input: &[u8]) -> Vec<RtspMessage> {
        let mut messages = Vec::new();
        let mut offset = 0;
        while offset < input.len() {
            let (status, consumed) = parser.parse(&input[offset..]);
            offset += consumed;
            match status.unwrap() {
                ParseStatus::Complete(message) => messages.push(message),
                ParseStatus::Incomplete => break,
            }
        }
        messages
    }

    #[test]
    fn test_parse_describe_request() {
        let mut parser = RtspParser::new();
        let input = b"DESCRIBE rtsp://h/p RTSP/1.0\r\nCSeq: 2\r\n\r\n";
        let messages = parse_all(&mut parser, input);

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            RtspMessage::Request(request) => {
                assert_eq!(request.method, "DESCRIBE");
                assert_eq!(request.uri, "rtsp://h/p");
                assert_eq!(request.version, (1, 0));
                assert_eq!(request.headers.get("CSeq"), Some("2"));
                assert!(request.body.is_empty());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_response_with_body() {
        let mut parser = RtspParser::new();
        let input =
            b"RTSP/1.0 200 OK\r\nCSeq: 3\r\nContent-Length: 5\r\n\r\nv=0\r\n";
        let messages = parse_all(&mut parser, input);

        assert_eq!(messages.len(), 1);
        match &messages[0] {
            RtspMessage::Response(response) => {
                assert_eq!(response.status, 200);
                assert_eq!(response.reason, "OK");
                assert_eq!(response.headers.cseq(), Some(3));
                assert_eq!(response.body, b"v=0\r\n");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_incremental_feeding() {
        let mut parser = RtspParser::new();
        let input = b"OPTIONS * RTSP/1.0\r\nCSeq: 1\r\n\r\n";

        // Feed one byte at a time; only the last byte completes
        for &byte in &input[..input.len() - 1] {
            let (status, consumed) = parser.parse(&[byte]);
            assert_eq!(status.unwrap(), ParseStatus::Incomplete);
            assert_eq!(consumed, 1);
        }
        let (status, _) = parser.parse(&input[input.len() - 1..]);
        assert!(matches!(status.unwrap(), ParseStatus::Complete(_)));
    }

    #[test]
    fn test_pipelined_messages() {
        let mut parser = RtspParser::new();
        let input = b"PLAY /a RTSP/1.0\r\nCSeq: 1\r\n\r\nTEARDOWN /a RTSP/1.0\r\nCSeq: 2\r\n\r\n";
        let messages = parse_all(&mut parser, input);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_bad_protocol_rejected() {
        let mut parser = RtspParser::new();
        let (status, _) = parser.parse(b"DESCRIBE /p HTTP/1.0\r\n");
        assert_eq!(status.unwrap_err(), RtspError::BadProtocol);
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut parser = RtspParser::new();
        let (status, _) = parser.parse(b"DESCRIBE /p RTSP/1.0\r\nBad Header: x\r\n\r\n");
        assert_eq!(status.unwrap_err(), RtspError::BadHeader);
    }

    #[test]
    fn test_parser_recovers_after_error() {
        let mut parser = RtspParser::new();
        let (status, _) = parser.parse(b"\x01garbage ");
        assert!(status.is_err());

        let messages = parse_all(&mut parser, b"OPTIONS * RTSP/1.0\r\nCSeq: 9\r\n\r\n");
        assert_eq!(messages.len(), 1);
    }
}
