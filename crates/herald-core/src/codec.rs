//! Binary wire schema for envelopes (panic-free).
//!
//! Every field is written as `index:u8, len:u32le, value`. Indexes are fixed
//! and never reused across schema changes; decoders skip indexes they do not
//! know. Routers of different versions run side by side during rolling
//! deployments, so this skip-unknown behavior is a compatibility requirement,
//! not an optimization.
//!
//! Parsing rules:
//! - Never index (`buf[0]`) — always use `Buf` and `remaining()` checks.
//! - Never `unwrap()` / `expect()` / `panic!()` in production paths.

use std::collections::HashMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::compress::Algorithm;
use crate::envelope::Envelope;
use crate::error::{HeraldError, Result};
use crate::route::{Route, TargetKind, DEFAULT_HOP_LIMIT, DEFAULT_PRIORITY};

/// First byte of every frame.
pub const WIRE_MAGIC: u8 = 0xA7;
/// Current schema version.
pub const WIRE_VERSION: u8 = 1;

// Envelope field indexes. Never reuse a retired index.
const F_ID: u8 = 1;
const F_MSG_TYPE: u8 = 2;
const F_ROUTE: u8 = 3;
const F_PAYLOAD: u8 = 4;
const F_CREATED_AT: u8 = 5;
const F_SENDER: u8 = 6;
const F_TAGS: u8 = 7;
const F_COMPRESSION: u8 = 8;

// Route field indexes (nested block, versioned by the envelope header).
const R_KIND: u8 = 1;
const R_TARGETS: u8 = 2;
const R_EXCLUDE: u8 = 3;
const R_PRIORITY: u8 = 4;
const R_EXPIRES_AT: u8 = 5;
const R_REQUIRE_ACK: u8 = 6;
const R_HOP: u8 = 7;
const R_HOP_LIMIT: u8 = 8;

fn put_field(out: &mut BytesMut, idx: u8, value: &[u8]) {
    out.put_u8(idx);
    out.put_u32_le(value.len() as u32);
    out.put_slice(value);
}

fn put_str_list(out: &mut BytesMut, items: &[String]) {
    out.put_u16_le(items.len() as u16);
    for item in items {
        out.put_u16_le(item.len() as u16);
        out.put_slice(item.as_bytes());
    }
}

fn encode_route(route: &Route) -> BytesMut {
    let mut out = BytesMut::new();
    put_field(&mut out, R_KIND, &[route.kind.wire_tag()]);

    let mut targets = BytesMut::new();
    put_str_list(&mut targets, &route.targets);
    put_field(&mut out, R_TARGETS, &targets);

    if !route.exclude.is_empty() {
        let mut exclude = BytesMut::new();
        put_str_list(&mut exclude, &route.exclude);
        put_field(&mut out, R_EXCLUDE, &exclude);
    }

    put_field(&mut out, R_PRIORITY, &[route.priority]);
    if let Some(t) = route.expires_at_ms {
        put_field(&mut out, R_EXPIRES_AT, &t.to_le_bytes());
    }
    if route.require_ack {
        put_field(&mut out, R_REQUIRE_ACK, &[1]);
    }
    if route.hop != 0 {
        put_field(&mut out, R_HOP, &[route.hop]);
    }
    put_field(&mut out, R_HOP_LIMIT, &[route.hop_limit]);
    out
}

/// Encode an envelope (payload already preprocessed) into a wire frame.
pub fn encode_envelope(env: &Envelope<Bytes>, algorithm: Algorithm) -> Bytes {
    let mut out = BytesMut::with_capacity(64 + env.payload().map_or(0, |p| p.len()));
    out.put_u8(WIRE_MAGIC);
    out.put_u8(WIRE_VERSION);

    put_field(&mut out, F_ID, env.id().as_bytes());
    put_field(&mut out, F_MSG_TYPE, env.msg_type.as_bytes());
    put_field(&mut out, F_ROUTE, &encode_route(&env.route));
    if let Some(payload) = env.payload() {
        put_field(&mut out, F_PAYLOAD, payload);
    }
    put_field(&mut out, F_CREATED_AT, &env.created_at_ms.to_le_bytes());
    if let Some(sender) = &env.sender {
        put_field(&mut out, F_SENDER, sender.as_bytes());
    }
    if !env.tags.is_empty() {
        let mut tags = BytesMut::new();
        tags.put_u16_le(env.tags.len() as u16);
        for (k, v) in &env.tags {
            tags.put_u16_le(k.len() as u16);
            tags.put_slice(k.as_bytes());
            tags.put_u16_le(v.len() as u16);
            tags.put_slice(v.as_bytes());
        }
        put_field(&mut out, F_TAGS, &tags);
    }
    if algorithm != Algorithm::None {
        put_field(&mut out, F_COMPRESSION, &[algorithm.wire_tag()]);
    }

    out.freeze()
}

fn read_field(buf: &mut Bytes) -> Result<(u8, Bytes)> {
    if buf.remaining() < 5 {
        return Err(HeraldError::Decode("truncated field header".into()));
    }
    let idx = buf.get_u8();
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(HeraldError::Decode(format!(
            "field {idx} declares {len} bytes, {} remain",
            buf.remaining()
        )));
    }
    Ok((idx, buf.copy_to_bytes(len)))
}

fn read_str(value: Bytes, what: &str) -> Result<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| HeraldError::Decode(format!("{what} is not valid utf-8")))
}

fn read_u64(value: &Bytes, what: &str) -> Result<u64> {
    let bytes: [u8; 8] = value
        .as_ref()
        .try_into()
        .map_err(|_| HeraldError::Decode(format!("{what} must be 8 bytes")))?;
    Ok(u64::from_le_bytes(bytes))
}

fn read_u8(value: &Bytes, what: &str) -> Result<u8> {
    match value.as_ref() {
        [b] => Ok(*b),
        _ => Err(HeraldError::Decode(format!("{what} must be 1 byte"))),
    }
}

fn read_str_list(mut value: Bytes, what: &str) -> Result<Vec<String>> {
    if value.remaining() < 2 {
        return Err(HeraldError::Decode(format!("{what} list truncated")));
    }
    let count = value.get_u16_le() as usize;
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        if value.remaining() < 2 {
            return Err(HeraldError::Decode(format!("{what} list truncated")));
        }
        let len = value.get_u16_le() as usize;
        if value.remaining() < len {
            return Err(HeraldError::Decode(format!("{what} entry truncated")));
        }
        items.push(read_str(value.copy_to_bytes(len), what)?);
    }
    Ok(items)
}

fn decode_route(mut buf: Bytes) -> Result<Route> {
    let mut kind = None;
    let mut targets = Vec::new();
    let mut exclude = Vec::new();
    let mut priority = DEFAULT_PRIORITY;
    let mut expires_at_ms = None;
    let mut require_ack = false;
    let mut hop = 0;
    let mut hop_limit = DEFAULT_HOP_LIMIT;

    while buf.has_remaining() {
        let (idx, value) = read_field(&mut buf)?;
        match idx {
            R_KIND => kind = Some(TargetKind::from_wire_tag(read_u8(&value, "route kind")?)?),
            R_TARGETS => targets = read_str_list(value, "targets")?,
            R_EXCLUDE => exclude = read_str_list(value, "exclude")?,
            R_PRIORITY => priority = read_u8(&value, "priority")?,
            R_EXPIRES_AT => expires_at_ms = Some(read_u64(&value, "expires_at")?),
            R_REQUIRE_ACK => require_ack = read_u8(&value, "require_ack")? != 0,
            R_HOP => hop = read_u8(&value, "hop")?,
            R_HOP_LIMIT => hop_limit = read_u8(&value, "hop_limit")?,
            // Field from a newer schema revision: skip.
            _ => {}
        }
    }

    let kind = kind.ok_or_else(|| HeraldError::Decode("route missing kind".into()))?;
    Ok(Route {
        kind,
        targets,
        exclude,
        priority,
        expires_at_ms,
        require_ack,
        hop,
        hop_limit,
    })
}

/// Decode a wire frame into an envelope plus its payload compression tag.
pub fn decode_envelope(mut buf: Bytes) -> Result<(Envelope<Bytes>, Algorithm)> {
    if buf.remaining() < 2 {
        return Err(HeraldError::Decode("frame too short".into()));
    }
    if buf.get_u8() != WIRE_MAGIC {
        return Err(HeraldError::Decode("bad magic".into()));
    }
    if buf.get_u8() != WIRE_VERSION {
        return Err(HeraldError::UnsupportedVersion);
    }

    let mut id = None;
    let mut msg_type = None;
    let mut route = None;
    let mut payload = None;
    let mut created_at_ms = None;
    let mut sender = None;
    let mut tags = HashMap::new();
    let mut algorithm = Algorithm::None;

    while buf.has_remaining() {
        let (idx, value) = read_field(&mut buf)?;
        match idx {
            F_ID => id = Some(read_str(value, "id")?),
            F_MSG_TYPE => msg_type = Some(read_str(value, "msg_type")?),
            F_ROUTE => route = Some(decode_route(value)?),
            F_PAYLOAD => payload = Some(value),
            F_CREATED_AT => created_at_ms = Some(read_u64(&value, "created_at")?),
            F_SENDER => sender = Some(read_str(value, "sender")?),
            F_TAGS => {
                let mut value = value;
                if value.remaining() < 2 {
                    return Err(HeraldError::Decode("tags truncated".into()));
                }
                let count = value.get_u16_le() as usize;
                for _ in 0..count {
                    if value.remaining() < 2 {
                        return Err(HeraldError::Decode("tags truncated".into()));
                    }
                    let klen = value.get_u16_le() as usize;
                    if value.remaining() < klen {
                        return Err(HeraldError::Decode("tag key truncated".into()));
                    }
                    let key = read_str(value.copy_to_bytes(klen), "tag key")?;
                    if value.remaining() < 2 {
                        return Err(HeraldError::Decode("tags truncated".into()));
                    }
                    let vlen = value.get_u16_le() as usize;
                    if value.remaining() < vlen {
                        return Err(HeraldError::Decode("tag value truncated".into()));
                    }
                    let val = read_str(value.copy_to_bytes(vlen), "tag value")?;
                    tags.insert(key, val);
                }
            }
            F_COMPRESSION => {
                algorithm = Algorithm::from_wire_tag(read_u8(&value, "compression")?)?
            }
            // Field from a newer schema revision: skip.
            _ => {}
        }
    }

    let id = id.ok_or_else(|| HeraldError::Decode("missing id".into()))?;
    if id.is_empty() {
        return Err(HeraldError::Decode("empty id".into()));
    }
    let msg_type = msg_type.ok_or_else(|| HeraldError::Decode("missing msg_type".into()))?;
    let route = route.ok_or_else(|| HeraldError::Decode("missing route".into()))?;

    let mut env = Envelope::with_id(id, msg_type, route, payload);
    if let Some(ts) = created_at_ms {
        env.created_at_ms = ts;
    }
    env.sender = sender;
    env.tags = tags;
    Ok((env, algorithm))
}
