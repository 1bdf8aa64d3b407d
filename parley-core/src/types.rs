use base64::Engine;
use serde::{Deserialize, Serialize};

/// Maximum allowed size for an inline media frame (4 MB).
/// Prevents accidental embedding of oversized payloads in Content parts.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

fn deserialize_frame_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD.decode(&s).map_err(serde::de::Error::custom)
}

fn serialize_frame_bytes<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let s = base64::engine::general_purpose::STANDARD.encode(bytes);
    serializer.serialize_str(&s)
}

/// A piece of conversation content: one author role plus an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

/// One element of a content turn.
///
/// Media frames carry raw bytes internally but serialize as base64 on the
/// wire, so transport collaborators never deal with encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    AudioFrame {
        mime_type: String,
        // Named distinctly per frame kind so the untagged enum stays
        // unambiguous on the wire.
        #[serde(
            rename = "audio",
            serialize_with = "serialize_frame_bytes",
            deserialize_with = "deserialize_frame_bytes"
        )]
        data: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    VideoFrame {
        mime_type: String,
        #[serde(
            rename = "video",
            serialize_with = "serialize_frame_bytes",
            deserialize_with = "deserialize_frame_bytes"
        )]
        data: Vec<u8>,
    },
    FunctionCall {
        /// Invocation id assigned by the model (or minted by the session).
        id: String,
        name: String,
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    FunctionResponse {
        /// Id of the invocation this responds to.
        id: String,
        name: String,
        response: serde_json::Value,
    },
}

impl Content {
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into(), parts: Vec::new() }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(Part::Text { text: text.into() });
        self
    }

    /// Add an inline audio frame.
    ///
    /// # Panics
    /// Panics if `data` exceeds [`MAX_FRAME_SIZE`].
    pub fn with_audio_frame(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        assert!(
            data.len() <= MAX_FRAME_SIZE,
            "frame size {} exceeds maximum of {} bytes",
            data.len(),
            MAX_FRAME_SIZE
        );
        self.parts.push(Part::AudioFrame { mime_type: mime_type.into(), data });
        self
    }

    /// Add an inline video frame.
    ///
    /// # Panics
    /// Panics if `data` exceeds [`MAX_FRAME_SIZE`].
    pub fn with_video_frame(mut self, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        assert!(
            data.len() <= MAX_FRAME_SIZE,
            "frame size {} exceeds maximum of {} bytes",
            data.len(),
            MAX_FRAME_SIZE
        );
        self.parts.push(Part::VideoFrame { mime_type: mime_type.into(), data });
        self
    }

    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::text).collect()
    }
}

impl Part {
    /// Returns the text content if this is a Text part, None otherwise.
    pub fn text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns true if this part carries a media frame.
    pub fn is_media(&self) -> bool {
        matches!(self, Part::AudioFrame { .. } | Part::VideoFrame { .. })
    }

    /// Returns the (id, name, args) of a FunctionCall part.
    pub fn function_call(&self) -> Option<(&str, &str, &serde_json::Value)> {
        match self {
            Part::FunctionCall { id, name, args } => Some((id, name, args)),
            _ => None,
        }
    }
}
