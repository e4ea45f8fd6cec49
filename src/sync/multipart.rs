//! `multipart/related` request bodies for the Drive upload endpoints.
//!
//! Drive's multipart upload expects a two-part body: a JSON metadata part
//! followed by the file content, with CRLF-delimited boundaries. The exact
//! byte layout is an external protocol detail, so the builder reproduces it
//! verbatim: `\r\n--<boundary>\r\nContent-Type: <type>\r\n\r\n<data>` per
//! part, closed by `\r\n--<boundary>--`.

use rand::distr::Alphanumeric;
use rand::Rng;

pub struct RelatedMultipart {
    boundary: String,
    parts: Vec<(String, Vec<u8>)>,
}

impl RelatedMultipart {
    pub fn new() -> Self {
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self::with_boundary(format!("rb_{suffix}"))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn json_part(self, body: impl Into<Vec<u8>>) -> Self {
        self.part("application/json; charset=UTF-8", body)
    }

    pub fn part(mut self, content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.parts.push((content_type.into(), body.into()));
        self
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/related; boundary={}", self.boundary)
    }

    /// Assemble the request body.
    pub fn into_body(self) -> Vec<u8> {
        let delimiter = format!("\r\n--{}\r\n", self.boundary);
        let close = format!("\r\n--{}--", self.boundary);

        let mut body = Vec::new();
        for (content_type, data) in &self.parts {
            body.extend_from_slice(delimiter.as_bytes());
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(data);
        }
        body.extend_from_slice(close.as_bytes());
        body
    }
}

impl Default for RelatedMultipart {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_layout_is_exact() {
        let multipart = RelatedMultipart::with_boundary("b1")
            .json_part(r#"{"name":"recipes.json"}"#)
            .part("application/json; charset=UTF-8", r#"{"data":1}"#);

        assert_eq!(multipart.content_type(), "multipart/related; boundary=b1");

        let body = String::from_utf8(multipart.into_body()).unwrap();
        assert_eq!(
            body,
            "\r\n--b1\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"recipes.json\"}\
             \r\n--b1\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{\"data\":1}\
             \r\n--b1--"
        );
    }

    #[test]
    fn test_binary_part_passes_through_untouched() {
        let payload = vec![0u8, 159, 146, 150]; // not valid UTF-8
        let body = RelatedMultipart::with_boundary("x")
            .part("image/webp", payload.clone())
            .into_body();

        let needle = b"Content-Type: image/webp\r\n\r\n";
        let pos = body
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap();
        assert_eq!(&body[pos + needle.len()..pos + needle.len() + 4], &payload[..]);
    }

    #[test]
    fn test_generated_boundaries_differ() {
        let a = RelatedMultipart::new();
        let b = RelatedMultipart::new();
        assert_ne!(a.content_type(), b.content_type());
    }
}
