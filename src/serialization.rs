//! Self-describing binary encoding (spec §4.7), used for WAL payloads and
//! for full-store snapshots. The tag-byte-plus-length-prefixed layout keeps
//! `int64` and `float64` distinct end-to-end so a round trip never silently
//! widens one into the other, the way a JSON-backed encoding would.
//!
//! ```text
//! tag: 1 byte  (0=null,1=bool,2=i64,3=f64,4=string,5=bytes,6=timestamp,7=list,8=map)
//! ```

use crate::error::{NornicError, Result};
use crate::model::{Edge, EdgeId, Node, NodeId, PropertyValue};
use std::collections::BTreeMap;
use std::convert::TryInto;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_I64: u8 = 2;
const TAG_F64: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_TIMESTAMP: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;

pub fn encode_property_value(value: &PropertyValue, out: &mut Vec<u8>) {
    match value {
        PropertyValue::Null => out.push(TAG_NULL),
        PropertyValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(*b as u8);
        }
        PropertyValue::Int(i) => {
            out.push(TAG_I64);
            out.extend_from_slice(&i.to_le_bytes());
        }
        PropertyValue::Float(f) => {
            out.push(TAG_F64);
            out.extend_from_slice(&f.to_le_bytes());
        }
        PropertyValue::String(s) => {
            out.push(TAG_STRING);
            encode_bytes(s.as_bytes(), out);
        }
        PropertyValue::Bytes(b) => {
            out.push(TAG_BYTES);
            encode_bytes(b, out);
        }
        PropertyValue::Timestamp(ms) => {
            out.push(TAG_TIMESTAMP);
            out.extend_from_slice(&ms.to_le_bytes());
        }
        PropertyValue::List(items) => {
            out.push(TAG_LIST);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_property_value(item, out);
            }
        }
        PropertyValue::Map(map) => {
            out.push(TAG_MAP);
            out.extend_from_slice(&(map.len() as u32).to_le_bytes());
            for (k, v) in map {
                encode_bytes(k.as_bytes(), out);
                encode_property_value(v, out);
            }
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

pub fn decode_property_value(buf: &[u8], pos: &mut usize) -> Result<PropertyValue> {
    let tag = read_u8(buf, pos)?;
    match tag {
        TAG_NULL => Ok(PropertyValue::Null),
        TAG_BOOL => Ok(PropertyValue::Bool(read_u8(buf, pos)? != 0)),
        TAG_I64 => Ok(PropertyValue::Int(i64::from_le_bytes(
            read_array(buf, pos)?,
        ))),
        TAG_F64 => Ok(PropertyValue::Float(f64::from_le_bytes(read_array(
            buf, pos,
        )?))),
        TAG_STRING => {
            let bytes = read_bytes(buf, pos)?;
            String::from_utf8(bytes)
                .map(PropertyValue::String)
                .map_err(|e| NornicError::Serialization(format!("invalid utf8 string: {e}")))
        }
        TAG_BYTES => Ok(PropertyValue::Bytes(read_bytes(buf, pos)?)),
        TAG_TIMESTAMP => Ok(PropertyValue::Timestamp(i64::from_le_bytes(read_array(
            buf, pos,
        )?))),
        TAG_LIST => {
            let count = read_u32(buf, pos)? as usize;
            let mut items = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                items.push(decode_property_value(buf, pos)?);
            }
            Ok(PropertyValue::List(items))
        }
        TAG_MAP => {
            let count = read_u32(buf, pos)? as usize;
            let mut map = BTreeMap::new();
            for _ in 0..count {
                let key_bytes = read_bytes(buf, pos)?;
                let key = String::from_utf8(key_bytes)
                    .map_err(|e| NornicError::Serialization(format!("invalid utf8 key: {e}")))?;
                let value = decode_property_value(buf, pos)?;
                map.insert(key, value);
            }
            Ok(PropertyValue::Map(map))
        }
        other => Err(NornicError::Serialization(format!(
            "unknown property tag {other}"
        ))),
    }
}

pub fn encode_node(node: &Node, out: &mut Vec<u8>) {
    encode_bytes(node.id.as_str().as_bytes(), out);
    out.extend_from_slice(&(node.labels.len() as u32).to_le_bytes());
    for label in &node.labels {
        encode_bytes(label.as_bytes(), out);
    }
    let mut props = Vec::new();
    encode_property_value(&PropertyValue::Map(node.properties.clone()), &mut props);
    out.extend_from_slice(&props);
    match &node.embedding {
        Some(vec) => {
            out.extend_from_slice(&(vec.len() as u32).to_le_bytes());
            for f in vec {
                out.extend_from_slice(&f.to_le_bytes());
            }
        }
        None => out.extend_from_slice(&0u32.to_le_bytes()),
    }
    out.extend_from_slice(&node.created.to_le_bytes());
    out.extend_from_slice(&node.updated.to_le_bytes());
}

pub fn decode_node(buf: &[u8]) -> Result<Node> {
    let mut pos = 0usize;
    let id = NodeId::from(String::from_utf8(read_bytes(buf, &mut pos)?).map_err(|e| {
        NornicError::Serialization(format!("invalid utf8 node id: {e}"))
    })?);
    let label_count = read_u32(buf, &mut pos)? as usize;
    let mut labels = Vec::with_capacity(label_count);
    for _ in 0..label_count {
        labels.push(
            String::from_utf8(read_bytes(buf, &mut pos)?)
                .map_err(|e| NornicError::Serialization(format!("invalid utf8 label: {e}")))?,
        );
    }
    let properties = match decode_property_value(buf, &mut pos)? {
        PropertyValue::Map(map) => map,
        _ => {
            return Err(NornicError::Serialization(
                "node properties must encode as a map".into(),
            ))
        }
    };
    let embedding_len = read_u32(buf, &mut pos)? as usize;
    let embedding = if embedding_len == 0 {
        None
    } else {
        let mut vec = Vec::with_capacity(embedding_len);
        for _ in 0..embedding_len {
            vec.push(f32::from_le_bytes(read_array(buf, &mut pos)?));
        }
        Some(vec)
    };
    let created = i64::from_le_bytes(read_array(buf, &mut pos)?);
    let updated = i64::from_le_bytes(read_array(buf, &mut pos)?);
    Ok(Node {
        id,
        labels,
        properties,
        embedding,
        created,
        updated,
    })
}

pub fn encode_edge(edge: &Edge, out: &mut Vec<u8>) {
    encode_bytes(edge.id.as_str().as_bytes(), out);
    encode_bytes(edge.start.as_str().as_bytes(), out);
    encode_bytes(edge.end.as_str().as_bytes(), out);
    encode_bytes(edge.edge_type.as_bytes(), out);
    let mut props = Vec::new();
    encode_property_value(&PropertyValue::Map(edge.properties.clone()), &mut props);
    out.extend_from_slice(&props);
    out.extend_from_slice(&edge.created.to_le_bytes());
    out.extend_from_slice(&edge.updated.to_le_bytes());
}

pub fn decode_edge(buf: &[u8]) -> Result<Edge> {
    let mut pos = 0usize;
    let id = EdgeId::from(
        String::from_utf8(read_bytes(buf, &mut pos)?)
            .map_err(|e| NornicError::Serialization(format!("invalid utf8 edge id: {e}")))?,
    );
    let start = NodeId::from(
        String::from_utf8(read_bytes(buf, &mut pos)?)
            .map_err(|e| NornicError::Serialization(format!("invalid utf8 start id: {e}")))?,
    );
    let end = NodeId::from(
        String::from_utf8(read_bytes(buf, &mut pos)?)
            .map_err(|e| NornicError::Serialization(format!("invalid utf8 end id: {e}")))?,
    );
    let edge_type = String::from_utf8(read_bytes(buf, &mut pos)?)
        .map_err(|e| NornicError::Serialization(format!("invalid utf8 edge type: {e}")))?;
    let properties = match decode_property_value(buf, &mut pos)? {
        PropertyValue::Map(map) => map,
        _ => {
            return Err(NornicError::Serialization(
                "edge properties must encode as a map".into(),
            ))
        }
    };
    let created = i64::from_le_bytes(read_array(buf, &mut pos)?);
    let updated = i64::from_le_bytes(read_array(buf, &mut pos)?);
    Ok(Edge {
        id,
        start,
        end,
        edge_type,
        properties,
        created,
        updated,
    })
}

/// Canonical typed-tag encoding used as an index/hash key so `1` (int64)
/// and `1.0` (float64) never collide (spec §3, §4.1).
pub fn canonical_key(value: &PropertyValue) -> Vec<u8> {
    let mut out = Vec::new();
    encode_property_value(value, &mut out);
    out
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8> {
    let byte = *buf
        .get(*pos)
        .ok_or_else(|| NornicError::Serialization("unexpected end of buffer".into()))?;
    *pos += 1;
    Ok(byte)
}

fn read_array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let end = pos
        .checked_add(N)
        .ok_or_else(|| NornicError::Serialization("length overflow".into()))?;
    let slice = buf
        .get(*pos..end)
        .ok_or_else(|| NornicError::Serialization("unexpected end of buffer".into()))?;
    let array: [u8; N] = slice
        .try_into()
        .map_err(|_| NornicError::Serialization("slice length mismatch".into()))?;
    *pos = end;
    Ok(array)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(buf, pos)?))
}

fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    let len = read_u32(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .ok_or_else(|| NornicError::Serialization("length overflow".into()))?;
    let slice = buf
        .get(*pos..end)
        .ok_or_else(|| NornicError::Serialization("unexpected end of buffer".into()))?;
    *pos = end;
    Ok(slice.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(value: &PropertyValue) -> PropertyValue {
        let mut buf = Vec::new();
        encode_property_value(value, &mut buf);
        let mut pos = 0;
        decode_property_value(&buf, &mut pos).expect("decode")
    }

    #[test]
    fn int_and_float_are_distinct_after_round_trip() {
        let i = PropertyValue::Int(1);
        let f = PropertyValue::Float(1.0);
        assert_eq!(round_trip(&i), i);
        assert_eq!(round_trip(&f), f);
        assert_ne!(round_trip(&i), round_trip(&f));
    }

    #[test]
    fn nested_list_and_map_round_trip() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), PropertyValue::Int(1));
        map.insert(
            "b".to_string(),
            PropertyValue::List(vec![PropertyValue::Bool(true), PropertyValue::Null]),
        );
        let value = PropertyValue::Map(map);
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn node_round_trips() {
        let mut node = Node::new(NodeId::from("n1"), vec!["Person".into()], 1000);
        node.properties
            .insert("age".into(), PropertyValue::Int(30));
        node.embedding = Some(vec![0.1, 0.2, 0.3]);
        node.updated = 2000;

        let mut buf = Vec::new();
        encode_node(&node, &mut buf);
        let decoded = decode_node(&buf).expect("decode");
        assert_eq!(decoded, node);
    }

    #[test]
    fn edge_round_trips() {
        let edge = Edge::new(
            EdgeId::from("e1"),
            NodeId::from("n1"),
            NodeId::from("n2"),
            "KNOWS".into(),
            500,
        );
        let mut buf = Vec::new();
        encode_edge(&edge, &mut buf);
        let decoded = decode_edge(&buf).expect("decode");
        assert_eq!(decoded, edge);
    }

    proptest! {
        #[test]
        fn arbitrary_strings_round_trip(s in ".*") {
            let value = PropertyValue::String(s);
            prop_assert_eq!(round_trip(&value), value);
        }

        #[test]
        fn arbitrary_ints_round_trip(i in any::<i64>()) {
            let value = PropertyValue::Int(i);
            prop_assert_eq!(round_trip(&value), value);
        }
    }
}
