//! Binary node codec for the [`crate::web`] transport.
//!
//! This is the crate's own framing, not WhatsApp's binary XML encoding.
//! Nodes are a kind byte followed by fields. A field is a one-byte tag, a
//! LEB128 length, then that many bytes. Nested payloads (media, buttons)
//! are themselves field lists.

use crate::error::{WhatsAppError, WhatsAppResult};
use crate::types::OutboundContent;

// Node kinds.
pub const NODE_MESSAGE: u8 = 0x0A;
pub const NODE_PRESENCE: u8 = 0x1A;
pub const NODE_PAIR_SUCCESS: u8 = 0x2A;
pub const NODE_STREAM_ERROR: u8 = 0x3A;

// Message fields.
const F_ID: u8 = 0x0A;
const F_JID: u8 = 0x12;
const F_TEXT: u8 = 0x1A;
const F_IMAGE: u8 = 0x22;
const F_DOCUMENT: u8 = 0x2A;
const F_BUTTONS: u8 = 0x32;

// Nested / inbound fields.
const F_FIRST: u8 = 0x0A;
const F_SECOND: u8 = 0x12;
const F_THIRD: u8 = 0x1A;

/// Field list writer.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(kind: u8) -> Self {
        Self { buf: vec![kind] }
    }

    pub fn bytes(&mut self, tag: u8, value: &[u8]) -> &mut Self {
        self.buf.push(tag);
        write_varint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn str(&mut self, tag: u8, value: &str) -> &mut Self {
        self.bytes(tag, value.as_bytes())
    }

    pub fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Encode an outbound message node.
pub fn encode_message(id: &str, jid: &str, content: &OutboundContent) -> WhatsAppResult<Vec<u8>> {
    let mut node = FieldWriter::node(NODE_MESSAGE);
    node.str(F_ID, id).str(F_JID, jid);

    match content {
        OutboundContent::Text { text } => {
            node.str(F_TEXT, text);
        }
        OutboundContent::Image {
            image,
            caption,
            mimetype,
        } => {
            let inner = FieldWriter::new()
                .str(F_FIRST, mimetype)
                .str(F_SECOND, caption)
                .bytes(F_THIRD, image)
                .finish();
            node.bytes(F_IMAGE, &inner);
        }
        OutboundContent::Document {
            document,
            mimetype,
            file_name,
        } => {
            let inner = FieldWriter::new()
                .str(F_FIRST, mimetype)
                .str(F_SECOND, file_name)
                .bytes(F_THIRD, document)
                .finish();
            node.bytes(F_DOCUMENT, &inner);
        }
        OutboundContent::Buttons {
            text,
            buttons,
            header_type,
        } => {
            let buttons = serde_json::to_vec(buttons)
                .map_err(|e| WhatsAppError::invalid_content(format!("buttons: {}", e)))?;
            let inner = FieldWriter::new()
                .str(F_FIRST, text)
                .bytes(F_SECOND, &buttons)
                .bytes(F_THIRD, &[*header_type])
                .finish();
            node.bytes(F_BUTTONS, &inner);
        }
    }

    Ok(node.finish())
}

/// A decoded inbound node.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundNode {
    PairSuccess {
        jid: String,
        push_name: Option<String>,
    },
    StreamError {
        code: u16,
    },
    Message {
        size: usize,
    },
    Presence,
    Unknown(u8),
}

/// Decode one inbound node.
pub fn decode(data: &[u8]) -> WhatsAppResult<InboundNode> {
    let (&kind, body) = data
        .split_first()
        .ok_or_else(|| WhatsAppError::invalid_content("empty node"))?;

    match kind {
        NODE_PAIR_SUCCESS => {
            let fields = read_fields(body)?;
            let jid = field_str(&fields, F_FIRST)?
                .ok_or_else(|| WhatsAppError::invalid_content("pair-success without jid"))?;
            let push_name = field_str(&fields, F_SECOND)?;
            Ok(InboundNode::PairSuccess { jid, push_name })
        }
        NODE_STREAM_ERROR => {
            let fields = read_fields(body)?;
            let raw = fields
                .iter()
                .find(|(tag, _)| *tag == F_FIRST)
                .map(|(_, v)| *v)
                .ok_or_else(|| WhatsAppError::invalid_content("stream error without code"))?;
            let code: [u8; 2] = raw
                .try_into()
                .map_err(|_| WhatsAppError::invalid_content("stream error code must be 2 bytes"))?;
            Ok(InboundNode::StreamError {
                code: u16::from_be_bytes(code),
            })
        }
        NODE_MESSAGE => Ok(InboundNode::Message { size: body.len() }),
        NODE_PRESENCE => Ok(InboundNode::Presence),
        other => Ok(InboundNode::Unknown(other)),
    }
}

fn read_fields(mut data: &[u8]) -> WhatsAppResult<Vec<(u8, &[u8])>> {
    let mut fields = Vec::new();
    while let Some((&tag, rest)) = data.split_first() {
        let (len, rest) = read_varint(rest)?;
        let len = usize::try_from(len)
            .map_err(|_| WhatsAppError::invalid_content("field length overflow"))?;
        if rest.len() < len {
            return Err(WhatsAppError::invalid_content("truncated field"));
        }
        fields.push((tag, &rest[..len]));
        data = &rest[len..];
    }
    Ok(fields)
}

fn field_str(fields: &[(u8, &[u8])], tag: u8) -> WhatsAppResult<Option<String>> {
    fields
        .iter()
        .find(|(t, _)| *t == tag)
        .map(|(_, v)| {
            String::from_utf8(v.to_vec())
                .map_err(|_| WhatsAppError::invalid_content("field is not UTF-8"))
        })
        .transpose()
}

fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn read_varint(data: &[u8]) -> WhatsAppResult<(u64, &[u8])> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate().take(10) {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok((value, &data[i + 1..]));
        }
    }
    Err(WhatsAppError::invalid_content("bad varint"))
}
