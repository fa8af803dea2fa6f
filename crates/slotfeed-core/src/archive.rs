//! Binary record archive.
//!
//! Records are stored back to back, little-endian, with no file header:
//!
//! ```text
//! record     := values<f32> values<u64> ins_id search_id:u64 rank:u32 cmatch:u32
//! values<T>  := count:u32 value:T × count  offsets:u16 interior:u32 × (offsets - 2)
//! ins_id     := len:u64 utf8 × len
//! ```
//!
//! The first offset (always 0) and the last (always `count`) are not stored
//! and are restored on read.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::pool::RecordPool;
use crate::slot::{SlotRecord, SlotValues};

/// A fixed-width little-endian value.
pub trait ArchiveValue: Copy {
    /// Encoded width in bytes.
    const WIDTH: usize;
    /// Appends the encoding of `self`.
    fn put(self, out: &mut Vec<u8>);
    /// Decodes from exactly [`Self::WIDTH`] bytes.
    fn get(bytes: &[u8]) -> Self;
}

impl ArchiveValue for u64 {
    const WIDTH: usize = 8;

    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn get(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Self::from_le_bytes(raw)
    }
}

impl ArchiveValue for f32 {
    const WIDTH: usize = 4;

    fn put(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }

    fn get(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(bytes);
        Self::from_le_bytes(raw)
    }
}

fn encode_values<T: ArchiveValue>(values: &SlotValues<T>, out: &mut Vec<u8>) -> Result<()> {
    let count = u32::try_from(values.total_len())
        .map_err(|_| Error::Archive("too many values in one record".to_string()))?;
    out.extend_from_slice(&count.to_le_bytes());
    for &v in values.values() {
        v.put(out);
    }

    let offsets = values.offsets();
    let offset_count = u16::try_from(offsets.len())
        .map_err(|_| Error::Archive(format!("{} slots exceed the format limit", offsets.len())))?;
    out.extend_from_slice(&offset_count.to_le_bytes());
    if offsets.len() > 2 {
        for &o in &offsets[1..offsets.len() - 1] {
            out.extend_from_slice(&o.to_le_bytes());
        }
    }
    Ok(())
}

/// Encodes one record.
///
/// # Errors
///
/// Returns [`Error::Archive`] if the record exceeds the format limits.
pub fn encode_record(record: &SlotRecord, out: &mut Vec<u8>) -> Result<()> {
    encode_values(&record.float_feasigns, out)?;
    encode_values(&record.uint64_feasigns, out)?;
    out.extend_from_slice(&(record.ins_id.len() as u64).to_le_bytes());
    out.extend_from_slice(record.ins_id.as_bytes());
    out.extend_from_slice(&record.search_id.to_le_bytes());
    out.extend_from_slice(&record.rank.to_le_bytes());
    out.extend_from_slice(&record.cmatch.to_le_bytes());
    Ok(())
}

fn truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::Archive("truncated record".to_string())
    } else {
        Error::Io(err)
    }
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

/// Reads exactly `len` bytes without trusting `len` for the allocation.
fn read_bytes<R: Read>(reader: &mut R, len: u64, out: &mut Vec<u8>) -> Result<()> {
    out.clear();
    let got = reader.take(len).read_to_end(out)?;
    if got as u64 != len {
        return Err(Error::Archive("truncated record".to_string()));
    }
    Ok(())
}

/// Reads the leading `u32` of a record; `None` on a clean end of input.
fn read_leading_u32<R: Read>(reader: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::Archive("truncated record".to_string())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(Some(u32::from_le_bytes(buf)))
}

fn decode_values<T: ArchiveValue, R: Read>(
    reader: &mut R,
    count: u32,
    scratch: &mut Vec<u8>,
    out: &mut SlotValues<T>,
) -> Result<()> {
    read_bytes(reader, u64::from(count) * T::WIDTH as u64, scratch)?;
    let values: Vec<T> = scratch.chunks_exact(T::WIDTH).map(T::get).collect();

    let offset_count = usize::from(u16::from_le_bytes(read_array(reader)?));
    let mut offsets = Vec::with_capacity(offset_count);
    if offset_count > 0 {
        offsets.push(0u32);
        if offset_count > 2 {
            read_bytes(reader, (offset_count as u64 - 2) * 4, scratch)?;
            offsets.extend(
                scratch
                    .chunks_exact(4)
                    .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );
        }
        if offset_count > 1 {
            offsets.push(count);
        } else if count != 0 {
            return Err(Error::Archive(format!(
                "{count} values stored without slots"
            )));
        }
    }

    let decoded = SlotValues::from_parts(values, offsets);
    decoded
        .check_invariants()
        .map_err(|e| Error::Archive(format!("corrupt offsets: {e}")))?;
    *out = decoded;
    Ok(())
}

/// Decodes the next record into `record`. Returns `false` at a clean end of
/// input.
///
/// # Errors
///
/// Returns [`Error::Archive`] for truncated or corrupt input.
pub fn decode_record<R: Read>(reader: &mut R, record: &mut SlotRecord) -> Result<bool> {
    let Some(float_count) = read_leading_u32(reader)? else {
        return Ok(false);
    };
    let mut scratch = Vec::new();
    decode_values(reader, float_count, &mut scratch, &mut record.float_feasigns)?;
    let uint64_count = u32::from_le_bytes(read_array(reader)?);
    decode_values(reader, uint64_count, &mut scratch, &mut record.uint64_feasigns)?;

    let id_len = u64::from_le_bytes(read_array(reader)?);
    read_bytes(reader, id_len, &mut scratch)?;
    record.ins_id = String::from_utf8(std::mem::take(&mut scratch))
        .map_err(|_| Error::Archive("instance id is not UTF-8".to_string()))?;

    record.search_id = u64::from_le_bytes(read_array(reader)?);
    record.rank = u32::from_le_bytes(read_array(reader)?);
    record.cmatch = u32::from_le_bytes(read_array(reader)?);
    Ok(true)
}

/// Appends records to an archive; safe to share between reader threads.
pub struct ArchiveWriter<W: Write = BufWriter<File>> {
    inner: Mutex<Option<W>>,
    written: std::sync::atomic::AtomicU64,
}

impl ArchiveWriter<BufWriter<File>> {
    /// Creates (truncating) an archive file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ArchiveWriter<W> {
    /// Wraps an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(Some(writer)),
            written: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Appends one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Archive`] after `close`, or on I/O failure.
    pub fn write(&self, record: &SlotRecord) -> Result<()> {
        self.write_all(std::slice::from_ref(record))
    }

    /// Appends records as one contiguous block.
    ///
    /// # Errors
    ///
    /// See [`write`](Self::write).
    pub fn write_all(&self, records: &[SlotRecord]) -> Result<()> {
        let mut encoded = Vec::new();
        for record in records {
            encode_record(record, &mut encoded)?;
        }
        let mut guard = self.inner.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::Archive("writer is closed".to_string()))?;
        writer.write_all(&encoded)?;
        self.written.fetch_add(
            records.len() as u64,
            std::sync::atomic::Ordering::Relaxed,
        );
        Ok(())
    }

    /// Flushes buffered bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on I/O failure.
    pub fn flush(&self) -> Result<()> {
        if let Some(writer) = self.inner.lock().as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    /// Flushes and closes the archive. Later writes fail.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] on I/O failure.
    pub fn close(&self) -> Result<Option<W>> {
        let mut writer = self.inner.lock().take();
        if let Some(w) = writer.as_mut() {
            w.flush()?;
        }
        Ok(writer)
    }

    /// Records written so far.
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.written.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Iterates the records of an archive, acquiring each from the pool.
pub struct ArchiveReader<R: Read = BufReader<File>> {
    reader: R,
    pool: Arc<RecordPool>,
    done: bool,
}

impl ArchiveReader<BufReader<File>> {
    /// Opens an archive file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, pool: Arc<RecordPool>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), pool))
    }
}

impl<R: Read> ArchiveReader<R> {
    /// Wraps an arbitrary reader.
    pub fn new(reader: R, pool: Arc<RecordPool>) -> Self {
        Self {
            reader,
            pool,
            done: false,
        }
    }
}

impl<R: Read> Iterator for ArchiveReader<R> {
    type Item = Result<SlotRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut record = self.pool.acquire_one();
        match decode_record(&mut self.reader, &mut record) {
            Ok(true) => Some(Ok(record)),
            Ok(false) => {
                self.done = true;
                self.pool.release_one(record);
                None
            }
            Err(e) => {
                self.done = true;
                self.pool.release_one(record);
                Some(Err(e))
            }
        }
    }
}
