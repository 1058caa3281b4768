//! Append-only durable log (spec §4.2, §6).
//!
//! On-disk frame layout, all integers little-endian:
//! ```text
//! magic:      4 bytes = b"WALE"
//! version:    1 byte
//! payload_len: 4 bytes (u32, excludes header and CRC)
//! payload:    N bytes (seq | timestamp | op | data_len | data | data_crc32)
//! frame_crc:  4 bytes (CRC32 of header+payload)
//! ```
//! A record is durable once the whole frame has been written and, per the
//! configured [`crate::config::SyncMode`], fsynced. Legacy single-line JSON
//! segments (the line starts with `{`) are still readable for migration,
//! per spec §9, but NornicDB only ever writes the atomic format.

mod record;

pub use record::{OperationKind, WalRecord};

use crate::config::SyncMode;
use crate::error::{NornicError, Result};
use record::{decode_body, encode_body};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

const MAGIC: &[u8; 4] = b"WALE";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4;
const FRAME_CRC_LEN: usize = 4;
const ACTIVE_SEGMENT_NAME: &str = "wal.log";

pub struct Wal {
    dir: PathBuf,
    active: File,
    active_len: u64,
    next_sequence: AtomicU64,
    sync_mode: SyncMode,
    segment_size: u64,
    poisoned: AtomicBool,
    appends_since_sync: u64,
    last_sync: Instant,
}

impl Wal {
    /// Opens (creating if absent) the WAL directory, replays every segment
    /// to find the last sequence, and returns a `Wal` positioned to append
    /// after it.
    pub fn reopen(dir: impl AsRef<Path>, sync_mode: SyncMode, segment_size: u64) -> Result<(Self, u64)> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut last_sequence = 0u64;
        let active_path = dir.join(ACTIVE_SEGMENT_NAME);
        for segment in segment_paths(&dir)? {
            let is_active = segment == active_path;
            let (records, valid_len) = scan_segment_with_len(&segment, &mut last_sequence)?;
            debug!(segment = %segment.display(), count = records.len(), "replayed WAL segment");
            if is_active {
                let on_disk_len = fs::metadata(&segment)?.len();
                if valid_len < on_disk_len {
                    warn!(
                        segment = %segment.display(),
                        valid_len,
                        on_disk_len,
                        "truncating torn tail from active segment"
                    );
                    let file = OpenOptions::new().write(true).open(&segment)?;
                    file.set_len(valid_len)?;
                }
            }
        }

        let active = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&active_path)?;
        let active_len = active.metadata()?.len();

        info!(last_sequence, "WAL reopened");
        Ok((
            Self {
                dir,
                active,
                active_len,
                next_sequence: AtomicU64::new(last_sequence + 1),
                sync_mode,
                segment_size,
                poisoned: AtomicBool::new(false),
                appends_since_sync: 0,
                last_sync: Instant::now(),
            },
            last_sequence,
        ))
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(NornicError::WalPoisoned);
        }
        Ok(())
    }

    /// Appends `payload` under `op`, returning its assigned sequence.
    /// Sequences are strictly monotonic with no gaps (spec invariant 5).
    pub fn append(&mut self, op: OperationKind, payload: Vec<u8>) -> Result<u64> {
        self.check_poisoned()?;

        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let record = WalRecord {
            sequence,
            timestamp: crate::model::now_millis(),
            op,
            payload,
        };

        let result = self.write_frame(&record);
        match result {
            Ok(()) => {
                self.appends_since_sync += 1;
                self.maybe_sync()?;
                Ok(sequence)
            }
            Err(e) => {
                self.poisoned.store(true, Ordering::Release);
                warn!(error = %e, "WAL append failed, poisoning the log");
                Err(e)
            }
        }
    }

    fn write_frame(&mut self, record: &WalRecord) -> Result<()> {
        self.maybe_rotate()?;

        let body = encode_body(record);
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + FRAME_CRC_LEN);
        frame.extend_from_slice(MAGIC);
        frame.push(VERSION);
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        self.active.write_all(&frame)?;
        self.active_len += frame.len() as u64;
        Ok(())
    }

    fn maybe_rotate(&mut self) -> Result<()> {
        if self.active_len < self.segment_size {
            return Ok(());
        }
        self.active.flush()?;
        self.active.sync_data()?;

        let next_suffix = segment_paths(&self.dir)?
            .iter()
            .filter_map(|p| rotated_suffix(p))
            .max()
            .unwrap_or(0)
            + 1;
        let rotated = self.dir.join(format!("{ACTIVE_SEGMENT_NAME}.{next_suffix}"));
        fs::rename(self.dir.join(ACTIVE_SEGMENT_NAME), &rotated)?;

        self.active = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(self.dir.join(ACTIVE_SEGMENT_NAME))?;
        self.active_len = 0;
        info!(rotated = %rotated.display(), "WAL segment rotated");
        Ok(())
    }

    fn maybe_sync(&mut self) -> Result<()> {
        match self.sync_mode {
            SyncMode::Immediate => self.sync(),
            SyncMode::Os => Ok(()),
            SyncMode::Group { every, interval_ms } => {
                let due_by_count = self.appends_since_sync >= every as u64;
                let due_by_time = self.last_sync.elapsed().as_millis() as u64 >= interval_ms;
                if due_by_count || due_by_time {
                    self.sync()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Forces an fsync regardless of sync mode.
    pub fn sync(&mut self) -> Result<()> {
        self.active.sync_data()?;
        self.appends_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    /// The most recently assigned sequence, or 0 if nothing has been
    /// appended yet. Used by `GraphStore::checkpoint` to know where a
    /// snapshot's WAL truncation point is.
    pub fn current_sequence(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst).saturating_sub(1)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Total bytes across every segment (rotated plus active), for health
    /// reporting against `Config`'s segment-size threshold.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;
        for segment in segment_paths(&self.dir)? {
            total += fs::metadata(&segment)?.len();
        }
        Ok(total)
    }

    /// Returns every record with `sequence >= from`, across all segments,
    /// oldest first. Replayed eagerly into memory; fine at embedded scale
    /// (segments are bounded by `segment_size`, default 64 MiB).
    pub fn iter_from(&self, from: u64) -> Result<std::vec::IntoIter<WalRecord>> {
        let mut last_sequence = 0u64;
        let mut out = Vec::new();
        for segment in segment_paths(&self.dir)? {
            for record in scan_segment(&segment, &mut last_sequence)? {
                if record.sequence >= from {
                    out.push(record);
                }
            }
        }
        Ok(out.into_iter())
    }

    /// Deletes every historical segment whose highest sequence is `<= seq`,
    /// used after a successful checkpoint (spec §3 "Checkpoint" lifecycle).
    pub fn truncate_through(&mut self, seq: u64) -> Result<()> {
        for segment in segment_paths(&self.dir)? {
            if segment
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n == ACTIVE_SEGMENT_NAME)
                .unwrap_or(false)
            {
                continue;
            }
            let mut last_sequence = 0u64;
            let records = scan_segment(&segment, &mut last_sequence)?;
            let max_seq = records.last().map(|r| r.sequence).unwrap_or(0);
            if max_seq <= seq {
                fs::remove_file(&segment)?;
                info!(segment = %segment.display(), "WAL segment truncated");
            }
        }
        Ok(())
    }
}

fn rotated_suffix(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let suffix = name.strip_prefix(&format!("{ACTIVE_SEGMENT_NAME}."))?;
    suffix.parse().ok()
}

/// All segments in replay order: rotated segments ascending by suffix, then
/// the active `wal.log` last.
fn segment_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut rotated: Vec<(u64, PathBuf)> = Vec::new();
    let mut active = None;
    if dir.exists() {
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            match path.file_name().and_then(|n| n.to_str()) {
                Some(ACTIVE_SEGMENT_NAME) => active = Some(path),
                _ => {
                    if let Some(suffix) = rotated_suffix(&path) {
                        rotated.push((suffix, path));
                    }
                }
            }
        }
    }
    rotated.sort_by_key(|(suffix, _)| *suffix);
    let mut result: Vec<PathBuf> = rotated.into_iter().map(|(_, p)| p).collect();
    if let Some(active) = active {
        result.push(active);
    }
    Ok(result)
}

/// Scans one segment file frame by frame, validating each against
/// `last_sequence` (updated in place) and returning every well-formed
/// record found, plus the byte length of the valid prefix. A partial tail
/// (process death mid-write, or any trailing garbage that doesn't start
/// with a valid magic) ends the scan successfully rather than raising an
/// error (spec §4.2); only a CRC mismatch on an otherwise intact frame is
/// treated as real corruption, since by then the frame committed to being
/// well-formed and failed anyway.
fn scan_segment(path: &Path, last_sequence: &mut u64) -> Result<Vec<WalRecord>> {
    Ok(scan_segment_with_len(path, last_sequence)?.0)
}

fn scan_segment_with_len(path: &Path, last_sequence: &mut u64) -> Result<(Vec<WalRecord>, u64)> {
    let mut file = File::open(path)?;
    let mut first_byte = [0u8; 1];
    let peeked = file.read(&mut first_byte)?;
    if peeked == 0 {
        return Ok((Vec::new(), 0));
    }
    if first_byte[0] == b'{' {
        let records = scan_legacy_segment(path, last_sequence)?;
        let len = fs::metadata(path)?.len();
        return Ok((records, len));
    }

    let mut reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    let mut valid_len = 0u64;
    loop {
        let mut header = [0u8; HEADER_LEN];
        if !read_exact_or_eof(&mut reader, &mut header)? {
            break;
        }
        if &header[0..4] != MAGIC {
            warn!(segment = %path.display(), "partial tail, truncated");
            break;
        }
        let payload_len = u32::from_le_bytes(header[5..9].try_into().unwrap()) as usize;

        let mut payload = vec![0u8; payload_len];
        if !read_exact_or_eof(&mut reader, &mut payload)? {
            warn!(segment = %path.display(), "partial tail, truncated");
            break;
        }
        let mut crc_buf = [0u8; FRAME_CRC_LEN];
        if !read_exact_or_eof(&mut reader, &mut crc_buf)? {
            warn!(segment = %path.display(), "partial tail, truncated");
            break;
        }
        let expected_crc = u32::from_le_bytes(crc_buf);

        let mut hashed = Vec::with_capacity(HEADER_LEN + payload.len());
        hashed.extend_from_slice(&header);
        hashed.extend_from_slice(&payload);
        if crc32fast::hash(&hashed) != expected_crc {
            return Err(NornicError::CorruptWal(*last_sequence));
        }

        let record = decode_body(&payload)?;
        if record.sequence != *last_sequence + 1 {
            return Err(NornicError::CorruptWal(record.sequence));
        }
        *last_sequence = record.sequence;
        valid_len += (HEADER_LEN + payload.len() + FRAME_CRC_LEN) as u64;
        out.push(record);
    }
    Ok((out, valid_len))
}

/// Legacy line-delimited JSON WAL format, kept readable for migration
/// (spec §9) even though NornicDB never writes it.
fn scan_legacy_segment(path: &Path, last_sequence: &mut u64) -> Result<Vec<WalRecord>> {
    #[derive(serde::Deserialize)]
    struct LegacyRecord {
        seq: u64,
        timestamp: i64,
        op: u8,
        data: Vec<u8>,
    }

    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let legacy: LegacyRecord = serde_json::from_str(&line)
            .map_err(|e| NornicError::Serialization(format!("legacy WAL line: {e}")))?;
        let op = OperationKind::from_u8(legacy.op)?;
        if legacy.seq <= *last_sequence {
            return Err(NornicError::CorruptWal(legacy.seq));
        }
        *last_sequence = legacy.seq;
        out.push(WalRecord {
            sequence: legacy.seq,
            timestamp: legacy.timestamp,
            op,
            payload: legacy.data,
        });
    }
    Ok(out)
}

fn read_exact_or_eof(reader: &mut impl std::io::Read, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0usize;
    while read < buf.len() {
        let n = reader.read(&mut buf[read..])?;
        if n == 0 {
            return Ok(read == 0);
        }
        read += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Seek;

    fn temp_dir() -> tempfile::TempDir {
        tempfile::tempdir().expect("tempdir")
    }

    #[test]
    fn append_and_replay_round_trips() {
        let dir = temp_dir();
        let (mut wal, last) = Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap();
        assert_eq!(last, 0);

        for i in 0..5u8 {
            let seq = wal
                .append(OperationKind::CreateNode, vec![i])
                .expect("append");
            assert_eq!(seq, i as u64 + 1);
        }

        let records: Vec<_> = wal.iter_from(1).unwrap().collect();
        assert_eq!(records.len(), 5);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.sequence, i as u64 + 1);
            assert_eq!(record.payload, vec![i as u8]);
        }
    }

    #[test]
    fn partial_tail_is_truncated_not_fatal() {
        let dir = temp_dir();
        {
            let (mut wal, _) =
                Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap();
            for i in 0..3u8 {
                wal.append(OperationKind::CreateNode, vec![i]).unwrap();
            }
        }

        // Simulate a crash mid-write by appending 13 garbage bytes.
        let path = dir.path().join(ACTIVE_SEGMENT_NAME);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xAAu8; 13]).unwrap();
        file.seek(std::io::SeekFrom::End(0)).unwrap();

        let (mut wal, last) =
            Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap();
        assert_eq!(last, 3);

        let next = wal.append(OperationKind::CreateNode, vec![99]).unwrap();
        assert_eq!(next, 4);
    }

    #[test]
    fn corrupt_frame_aborts_replay() {
        let dir = temp_dir();
        {
            let (mut wal, _) =
                Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap();
            wal.append(OperationKind::CreateNode, vec![1]).unwrap();
        }
        let path = dir.path().join(ACTIVE_SEGMENT_NAME);
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap_err();
        assert!(matches!(err, NornicError::CorruptWal(_)));
    }

    #[test]
    fn legacy_json_segment_is_readable() {
        let dir = temp_dir();
        fs::create_dir_all(dir.path()).unwrap();
        let path = dir.path().join(ACTIVE_SEGMENT_NAME);
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"seq":1,"timestamp":1000,"op":0,"data":[1,2,3]}}"#).unwrap();
        drop(file);

        let (_wal, last) = Wal::reopen(dir.path(), SyncMode::Immediate, 64 * 1024 * 1024).unwrap();
        assert_eq!(last, 1);
    }
}
