//! Minimal multipart/form-data codec for the client.
//!
//! # Responsibilities
//! - Encode field and file parts with a generated boundary
//! - Decode a multipart response body into its parts
//!
//! # Design Decisions
//! - Covers the framing this crate produces and consumes, not the full
//!   grammar (no nested multipart, no transfer encodings)

use bytes::Bytes;

use crate::error::Error;

/// One field or file of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl Part {
    pub fn field(name: impl Into<String>, value: impl Into<String>) -> Self {
        Part {
            name: name.into(),
            filename: None,
            content_type: None,
            data: Bytes::from(value.into().into_bytes()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Part {
            name: name.into(),
            filename: Some(filename.into()),
            content_type: Some(content_type.into()),
            data: data.into(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

/// Encode parts into a body and its `content-type` header value.
pub fn encode(parts: &[Part]) -> (String, Bytes) {
    let boundary = format!("strand-{}", uuid::Uuid::new_v4().simple());
    let mut body: Vec<u8> = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        match &part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = &part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    (
        format!("multipart/form-data; boundary={boundary}"),
        Bytes::from(body),
    )
}

/// Decode a multipart body. `content_type` must carry the boundary parameter.
pub fn decode(content_type: &str, body: &[u8]) -> Result<Vec<Part>, Error> {
    let boundary = content_type
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"'))
        .ok_or_else(|| Error::Parse("multipart content type without boundary".to_string()))?;
    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();
    let mut rest = body;
    // Skip the preamble up to the first delimiter.
    match find(rest, delimiter.as_bytes()) {
        Some(at) => rest = &rest[at + delimiter.len()..],
        None => return Err(Error::Parse("multipart body without boundary".to_string())),
    }
    loop {
        if rest.starts_with(b"--") {
            return Ok(parts);
        }
        rest = rest.strip_prefix(b"\r\n").unwrap_or(rest);
        let end = find(rest, delimiter.as_bytes())
            .ok_or_else(|| Error::Parse("unterminated multipart part".to_string()))?;
        let section = &rest[..end];
        rest = &rest[end + delimiter.len()..];
        parts.push(parse_part(section)?);
    }
}

fn parse_part(section: &[u8]) -> Result<Part, Error> {
    let split = find(section, b"\r\n\r\n")
        .ok_or_else(|| Error::Parse("multipart part without header block".to_string()))?;
    let headers = std::str::from_utf8(&section[..split])
        .map_err(|_| Error::Parse("multipart part headers are not UTF-8".to_string()))?;
    let data = &section[split + 4..];
    let data = data.strip_suffix(b"\r\n").unwrap_or(data);

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in headers.lines() {
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("content-disposition:") {
            for attr in line.split(';').map(str::trim) {
                if let Some(v) = attr.strip_prefix("name=") {
                    name = Some(v.trim_matches('"').to_string());
                } else if let Some(v) = attr.strip_prefix("filename=") {
                    filename = Some(v.trim_matches('"').to_string());
                }
            }
        } else if lower.starts_with("content-type:") {
            content_type = line.split_once(':').map(|(_, v)| v.trim().to_string());
        }
    }
    Ok(Part {
        name: name.ok_or_else(|| Error::Parse("multipart part without a name".to_string()))?,
        filename,
        content_type,
        data: Bytes::copy_from_slice(data),
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
