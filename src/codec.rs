//! Line-based frame codec
//!
//! Encodes a list of string fields into one `IBGAME;...\n` wire frame and
//! decodes a frame back into its fields. The delimiter is escaped with a
//! backslash inside fields; a literal backslash is doubled. The terminator
//! may never appear inside a field.

use crate::error::ProtocolError;
use crate::protocol::{MSG_DELIMITER, MSG_ESCAPE, MSG_HEADER, MSG_TERMINATOR};

/// Encode fields into a complete wire frame.
///
/// Emits the header, then for each field the delimiter followed by the
/// escaped field, then the terminator. The header itself is not part of
/// `fields`.
pub fn encode(fields: &[String]) -> Result<String, ProtocolError> {
    let mut msg = String::with_capacity(MSG_HEADER.len() + 16 * fields.len());
    msg.push_str(MSG_HEADER);

    for field in fields {
        if field.contains(MSG_TERMINATOR) {
            return Err(ProtocolError::FieldContainsTerminator);
        }
        msg.push(MSG_DELIMITER);
        for ch in field.chars() {
            if ch == MSG_DELIMITER || ch == MSG_ESCAPE {
                msg.push(MSG_ESCAPE);
            }
            msg.push(ch);
        }
    }

    msg.push(MSG_TERMINATOR);
    Ok(msg)
}

/// Decode one complete frame into its fields.
///
/// Consumes the input up to and including the first terminator; anything
/// after it is ignored. The header is returned as field 0 and the verb as
/// field 1. Fails with `NonPrintable` on control characters before the
/// terminator and `IncompleteFrame` when no terminator exists.
pub fn decode(raw: &str) -> Result<Vec<String>, ProtocolError> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;

    for ch in raw.chars() {
        if !escaped && ch == MSG_TERMINATOR {
            fields.push(current);
            return Ok(fields);
        }

        if ch.is_control() {
            return Err(ProtocolError::NonPrintable);
        }

        if escaped {
            current.push(ch);
            escaped = false;
        } else if ch == MSG_ESCAPE {
            escaped = true;
        } else if ch == MSG_DELIMITER {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }

    Err(ProtocolError::IncompleteFrame)
}

/// Split a byte buffer at the first terminator.
///
/// Returns the frame (terminator included) and the number of bytes it
/// occupies, or `None` when the buffer holds no complete frame yet.
pub fn split_frame(buf: &[u8]) -> Option<(&[u8], usize)> {
    let idx = buf.iter().position(|&b| b == MSG_TERMINATOR as u8)?;
    Some((&buf[..=idx], idx + 1))
}

/// Make a payload safe for log output by escaping control characters.
pub fn escape_for_log(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}
