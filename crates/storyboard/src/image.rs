use crate::{Result, StoryboardError};
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// A self-describing `data:<mime>;base64,<payload>` image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    mime_type: String,
    data: String,
}

impl DataUri {
    /// Builds a data URI from an already base64-encoded payload, validating it.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Result<Self> {
        let mime_type = mime_type.into();
        let data = data.into();
        if mime_type.trim().is_empty() || !mime_type.contains('/') {
            return Err(StoryboardError::InvalidImage(format!(
                "missing or malformed mime type {mime_type:?}"
            )));
        }
        base64::engine::general_purpose::STANDARD
            .decode(data.as_bytes())
            .map_err(|err| StoryboardError::InvalidImage(format!("payload is not base64: {err}")))?;
        Ok(Self { mime_type, data })
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .trim()
            .strip_prefix("data:")
            .ok_or_else(|| StoryboardError::InvalidImage("not a data URI".to_string()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| StoryboardError::InvalidImage("data URI has no payload".to_string()))?;
        let mut params = header.split(';');
        let mime_type = params.next().unwrap_or_default();
        if !params.any(|param| param.eq_ignore_ascii_case("base64")) {
            return Err(StoryboardError::InvalidImage(
                "only base64 data URIs are supported".to_string(),
            ));
        }
        Self::new(mime_type, payload)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Base64 payload, without the `data:` header.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .map_err(|err| StoryboardError::InvalidImage(err.to_string()))
    }
}

impl FromStr for DataUri {
    type Err = StoryboardError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for DataUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Image mime type for a file extension, if it is one we accept as a reference.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let uri = DataUri::parse("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(uri.mime_type(), "image/png");
        assert_eq!(uri.data(), "aGVsbG8=");
        assert_eq!(uri.decode().unwrap(), b"hello");
        assert_eq!(uri.to_string(), "data:image/png;base64,aGVsbG8=");
    }

    #[test]
    fn test_from_bytes() {
        let uri = DataUri::from_bytes("image/jpeg", b"hello");
        assert_eq!(uri.to_string(), "data:image/jpeg;base64,aGVsbG8=");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "https://example.com/a.png",
            "data:image/png;base64",
            "data:image/png,aGVsbG8=",
            "data:;base64,aGVsbG8=",
            "data:image/png;base64,***",
        ] {
            assert!(DataUri::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(mime_for_extension("JPG"), Some("image/jpeg"));
        assert_eq!(mime_for_extension("txt"), None);
    }
}
