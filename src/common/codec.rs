//! # Message Framing
//!
//! Messages travel as compact JSON followed by a two-byte terminator:
//! ```text
//! {"protocol_type":"get_game","game_id":7}\r\n{"protocol_type":"save_game",...}\r\n
//! ```
//!
//! JSON escapes control characters inside strings, so `\r\n` can only appear
//! between frames. A single read may hold several frames and end in the middle
//! of one; [`decode`] hands the trailing fragment back to the caller, who
//! prefixes it to the next read.

use super::error::NetError;
use super::messages::Message;

/// Frame terminator.
pub const TERMINATOR: &[u8] = b"\r\n";

/// Maximum size of a single frame, and of an undecoded remainder.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Result of splitting a buffer into frames.
#[derive(Debug, Default, PartialEq)]
pub struct Decoded {
    /// Complete messages, in wire order.
    pub messages: Vec<Message>,
    /// Bytes after the last terminator.
    pub remainder: Vec<u8>,
}

/// Serialize a message and append the terminator.
pub fn encode(message: &Message) -> Result<Vec<u8>, NetError> {
    message.require_kind()?;
    let mut frame = message.to_bytes()?;
    frame.extend_from_slice(TERMINATOR);
    Ok(frame)
}

/// Split `buffer` into complete messages plus the unconsumed remainder.
///
/// Empty frames are skipped. A frame that is not UTF-8, not a JSON object or
/// has no `protocol_type` fails the whole call with `MalformedMessage`.
pub fn decode(buffer: &[u8]) -> Result<Decoded, NetError> {
    let mut messages = Vec::new();
    let mut start = 0;

    while let Some(offset) = find_terminator(&buffer[start..]) {
        let frame = &buffer[start..start + offset];
        start += offset + TERMINATOR.len();

        if frame.is_empty() {
            continue;
        }
        if frame.len() > MAX_FRAME_SIZE {
            return Err(NetError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        messages.push(parse_frame(frame)?);
    }

    let remainder = buffer[start..].to_vec();
    if remainder.len() > MAX_FRAME_SIZE {
        return Err(NetError::FrameTooLarge {
            size: remainder.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    Ok(Decoded {
        messages,
        remainder,
    })
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

fn parse_frame(frame: &[u8]) -> Result<Message, NetError> {
    let text = std::str::from_utf8(frame).map_err(|e| NetError::MalformedMessage {
        reason: format!("frame is not UTF-8: {}", e),
    })?;
    let message = Message::from_bytes(text.as_bytes())?;
    if message.kind().is_none() {
        return Err(NetError::MalformedMessage {
            reason: "frame has no protocol_type".to_string(),
        });
    }
    Ok(message)
}
