use regex::Regex;
use std::sync::LazyLock;

/// MIME type assumed when the payload does not declare one.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^data:(.*?);base64,(.*)$").expect("data URI pattern is valid")
});

/// An image as received from the client, split into MIME type and base64 data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    /// Base64 without any `data:` prefix. Empty when the input was unusable.
    pub data: String,
}

impl ImagePayload {
    /// `true` when there is nothing to send to a provider.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Re-encode as a `data:` URI (OpenRouter takes images this way).
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Split a data URI or a bare base64 blob into an [`ImagePayload`].
///
/// Never fails. The MIME type is everything between `data:` and `;base64,`,
/// parameters included. Anything that is not a `data:...;base64,<data>` URI is taken
/// as raw base64 with the default MIME type, so an empty or blank input comes
/// back with empty `data` and must be rejected by the caller.
///
/// ```rust
/// use image_muse::payload::parse;
///
/// let payload = parse("data:image/png;base64,iVBORw0KGgo=");
/// assert_eq!(payload.mime_type, "image/png");
/// assert_eq!(payload.data, "iVBORw0KGgo=");
///
/// assert!(parse("").is_empty());
/// ```
pub fn parse(raw: &str) -> ImagePayload {
    let trimmed = raw.trim();

    match DATA_URI.captures(trimmed) {
        Some(caps) => {
            let mime_type = caps
                .get(1)
                .map(|m| m.as_str().trim())
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MIME_TYPE)
                .to_string();
            let data = caps
                .get(2)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            ImagePayload { mime_type, data }
        }
        None => ImagePayload {
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            data: trimmed.to_string(),
        },
    }
}
