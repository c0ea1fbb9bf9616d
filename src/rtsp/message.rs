//! RTSP messages
//!
//! Requests and responses with ordered, case-insensitively addressable
//! headers. CSeq pairing and Content-Length handling follow RTSP/1.0.

use std::fmt;

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtspHeaders {
    entries: Vec<(String, String)>,
}

impl RtspHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the header if present, appends otherwise.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Appends without replacing; parsing uses this to keep duplicates.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn cseq(&self) -> Option<u32> {
        self.get("CSeq").and_then(|v| v.trim().parse().ok())
    }

    pub fn content_length(&self) -> usize {
        self.get("Content-Length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    fn encode_into(&self, out: &mut Vec<u8>, body_len: usize) {
        for (name, value) in &self.entries {
            if name.eq_ignore_ascii_case("Content-Length") {
                continue; // always derived from the body
            }
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        if body_len > 0 {
            out.extend_from_slice(format!("Content-Length: {body_len}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
    }
}

/// An RTSP request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: String,
    pub uri: String,
    pub version: (u8, u8),
    pub headers: RtspHeaders,
    pub body: Vec<u8>,
}

impl RtspRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            version: (1, 0),
            headers: RtspHeaders::new(),
            body: Vec::new(),
        }
    }

    /// The path component of the request URI.
    pub fn path(&self) -> &str {
        let uri = &self.uri;
        if let Some(scheme_end) = uri.find("://") {
            let after = &uri[scheme_end + 3..];
            match after.find('/') {
                Some(index) => &after[index..],
                None => "/",
            }
        } else {
            uri
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!(
                "{} {} RTSP/{}.{}\r\n",
                self.method, self.uri, self.version.0, self.version.1
            )
            .as_bytes(),
        );
        self.headers.encode_into(&mut out, self.body.len());
        out.extend_from_slice(&self.body);
        out
    }
}

impl fmt::Display for RtspRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// An RTSP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub reason: String,
    pub version: (u8, u8),
    pub headers: RtspHeaders,
    pub body: Vec<u8>,
}

impl Default for RtspResponse {
    fn default() -> Self {
        Self::new(200, "OK")
    }
}

impl RtspResponse {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            version: (1, 0),
            headers: RtspHeaders::new(),
            body: Vec::new(),
        }
    }

    /// A response answering `request`, with the CSeq carried over.
    pub fn to_request(request: &RtspRequest, status: u16, reason: impl Into<String>) -> Self {
        let mut response = Self::new(status, reason);
        if let Some(cseq) = request.headers.get("CSeq") {
            response.headers.set("CSeq", cseq);
        }
        response
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!(
                "RTSP/{}.{} {} {}\r\n",
                self.version.0, self.version.1, self.status, self.reason
            )
            .as_bytes(),
        );
        self.headers.encode_into(&mut out, self.body.len());
        out.extend_from_slice(&self.body);
        out
    }
}

/// Either kind of RTSP message, as produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtspMessage {
    Request(RtspRequest),
    Response(RtspResponse),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = RtspHeaders::new();
        headers.set("Content-Type", "application/sdp");
        assert_eq!(headers.get("content-type"), Some("application/sdp"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/sdp"));

        headers.set("content-type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.iter().count(), 1);
    }

    #[test]
    fn test_request_encode() {
        let mut request = RtspRequest::new("DESCRIBE", "rtsp://host/by-name/studio");
        request.headers.set("CSeq", "2");
        let encoded = request.encode();
        let text = String::from_utf8(encoded).unwrap();
        assert!(text.starts_with("DESCRIBE rtsp://host/by-name/studio RTSP/1.0\r\n"));
        assert!(text.contains("CSeq: 2\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_body_gets_content_length() {
        let mut request = RtspRequest::new("ANNOUNCE", "rtsp://host/p");
        request.body = b"v=0\r\n".to_vec();
        let text = String::from_utf8(request.encode()).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("v=0\r\n"));
    }

    #[test]
    fn test_response_carries_cseq() {
        let mut request = RtspRequest::new("DESCRIBE", "/p");
        request.headers.set("CSeq", "17");
        let response = RtspResponse::to_request(&request, 200, "OK");
        assert_eq!(response.headers.get("CSeq"), Some("17"));
        assert_eq!(response.headers.cseq(), Some(17));
    }

    #[test]
    fn test_request_path() {
        let request = RtspRequest::new("DESCRIBE", "rtsp://10.0.0.1:8554/by-name/studio a");
        assert_eq!(request.path(), "/by-name/studio a");

        let request = RtspRequest::new("DESCRIBE", "/direct/path");
        assert_eq!(request.path(), "/direct/path");
    }
}
