//! The logical record carried inside each WAL frame (spec §3, §4.2).

use crate::error::{NornicError, Result};
use std::convert::TryInto;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationKind {
    CreateNode = 0,
    UpdateNode = 1,
    DeleteNode = 2,
    CreateEdge = 3,
    UpdateEdge = 4,
    DeleteEdge = 5,
    BeginTxn = 6,
    CommitTxn = 7,
    Checkpoint = 8,
}

impl OperationKind {
    pub fn from_u8(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => Self::CreateNode,
            1 => Self::UpdateNode,
            2 => Self::DeleteNode,
            3 => Self::CreateEdge,
            4 => Self::UpdateEdge,
            5 => Self::DeleteEdge,
            6 => Self::BeginTxn,
            7 => Self::CommitTxn,
            8 => Self::Checkpoint,
            _other => return Err(NornicError::CorruptWal(0)),
        })
    }
}

/// An appended WAL entry: a monotonic [`sequence`](Self::sequence), the
/// wall-clock time it was appended, its [`OperationKind`], and an opaque
/// payload (itself encoded with [`crate::serialization`]).
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub sequence: u64,
    pub timestamp: i64,
    pub op: OperationKind,
    pub payload: Vec<u8>,
}

/// Encodes the record body that sits inside a frame's payload region:
/// `seq(8) | timestamp(8) | op(1) | data_len(4) | data | data_crc32(4)`.
pub fn encode_body(record: &WalRecord) -> Vec<u8> {
    let mut out = Vec::with_capacity(21 + record.payload.len());
    out.extend_from_slice(&record.sequence.to_le_bytes());
    out.extend_from_slice(&record.timestamp.to_le_bytes());
    out.push(record.op as u8);
    out.extend_from_slice(&(record.payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&record.payload);
    let data_crc = crc32fast::hash(&record.payload);
    out.extend_from_slice(&data_crc.to_le_bytes());
    out
}

pub fn decode_body(buf: &[u8]) -> Result<WalRecord> {
    let mut pos = 0usize;
    let sequence = u64::from_le_bytes(read_array(buf, &mut pos)?);
    let timestamp = i64::from_le_bytes(read_array(buf, &mut pos)?);
    let op_tag = *buf
        .get(pos)
        .ok_or_else(|| NornicError::CorruptWal(sequence))?;
    pos += 1;
    let op = OperationKind::from_u8(op_tag).map_err(|_| NornicError::CorruptWal(sequence))?;
    let data_len = u32::from_le_bytes(read_array(buf, &mut pos)?) as usize;
    let end = pos
        .checked_add(data_len)
        .ok_or(NornicError::CorruptWal(sequence))?;
    let payload = buf
        .get(pos..end)
        .ok_or(NornicError::CorruptWal(sequence))?
        .to_vec();
    pos = end;
    let data_crc = u32::from_le_bytes(read_array(buf, &mut pos)?);
    if crc32fast::hash(&payload) != data_crc {
        return Err(NornicError::CorruptWal(sequence));
    }
    Ok(WalRecord {
        sequence,
        timestamp,
        op,
        payload,
    })
}

fn read_array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let end = pos.checked_add(N).ok_or(NornicError::CorruptWal(0))?;
    let slice = buf.get(*pos..end).ok_or(NornicError::CorruptWal(0))?;
    let array: [u8; N] = slice.try_into().map_err(|_| NornicError::CorruptWal(0))?;
    *pos = end;
    Ok(array)
}
