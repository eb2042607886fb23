//! Outbound frame builders and inbound wire types.
//!
//! ## Outbound
//!
//! | Mode | Audio | Video |
//! |------|-------|-------|
//! | free-text / tool-call | `{"mimeType":"audio/pcm;rate=16000","data":<b64>}` | `{"mimeType":"image/jpeg","data":<b64>}` |
//! | duplex-socket | raw PCM16 binary frame | `{"type":"video","data":<b64>}` |
//!
//! ## Inbound (tool-call mode)
//!
//! Named invocations `{id, name, args}` — acknowledged with
//! `{"toolAck":{"id":...,"name":...}}`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::client::ChannelMode;
use crate::session::transport::WireFrame;

pub const MIME_AUDIO_PCM16: &str = "audio/pcm;rate=16000";
pub const MIME_IMAGE_JPEG: &str = "image/jpeg";

/// A named structured invocation from the remote endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInvocation {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Build the outbound audio frame for the active channel mode.
pub fn audio_frame(mode: ChannelMode, pcm_le: Vec<u8>) -> WireFrame {
    match mode {
        ChannelMode::DuplexSocket => WireFrame::Binary(pcm_le),
        ChannelMode::FreeText | ChannelMode::ToolCall => WireFrame::Text(
            json!({
                "mimeType": MIME_AUDIO_PCM16,
                "data": BASE64.encode(pcm_le),
            })
            .to_string(),
        ),
    }
}

/// Build the outbound video frame for the active channel mode.
pub fn video_frame(mode: ChannelMode, jpeg: &[u8]) -> WireFrame {
    let data = BASE64.encode(jpeg);
    let payload = match mode {
        // The fallback backend accepts video only as a typed JSON frame.
        ChannelMode::DuplexSocket => json!({ "type": "video", "data": data }),
        ChannelMode::FreeText | ChannelMode::ToolCall => json!({
            "mimeType": MIME_IMAGE_JPEG,
            "data": data,
        }),
    };
    WireFrame::Text(payload.to_string())
}

/// Acknowledgement echoing an invocation's id/name, so the remote side's
/// monitoring loop continues.
pub fn tool_ack(invocation: &ToolInvocation) -> WireFrame {
    WireFrame::Text(
        json!({
            "toolAck": {
                "id": invocation.id,
                "name": invocation.name,
            }
        })
        .to_string(),
    )
}
