use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Record;

/// Largest payload a frame may declare. Store records are a few dozen bytes; a
/// length beyond this is a torn or overwritten header.
const MAX_FRAME_BYTES: usize = 64 * 1024;

fn write_frame(writer: &mut impl Write, record: &Record) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Next checksummed payload, or `None` at the end of the usable log.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    fn eof_as_none(result: io::Result<()>) -> io::Result<Option<()>> {
        match result {
            Ok(()) => Ok(Some(())),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    let mut word = [0u8; 4];
    if eof_as_none(reader.read_exact(&mut word))?.is_none() {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if eof_as_none(reader.read_exact(&mut payload))?.is_none() {
        return Ok(None);
    }
    if eof_as_none(reader.read_exact(&mut word))?.is_none() {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// The room and restriction log behind `WalStore`. Owned by the store's writer
/// thread; nothing else appends to it.
///
/// Each frame is a little-endian `u32` payload length, the bincode-encoded
/// [`Record`], then a little-endian crc32 of the payload. Replay keeps every
/// frame up to the first one that is short, oversized, fails its checksum, or
/// does not decode; anything after that point is dropped.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Durable once this returns: the frame is flushed and the file synced.
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        self.sync()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as exactly `records`. The new file is synced before it is
    /// renamed into place, so a crash leaves either the old log or the new one.
    pub fn compact(&mut self, records: &[Record]) -> io::Result<()> {
        let staged = self.path.with_extension("wal.tmp");
        let mut out = BufWriter::new(File::create(&staged)?);
        for record in records {
            write_frame(&mut out, record)?;
        }
        out.flush()?;
        out.get_ref().sync_all()?;
        drop(out);

        fs::rename(&staged, &self.path)?;
        self.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Records in log order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Record>> {
        let mut reader = match File::open(path) {
            Ok(f) => BufReader::new(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut records = Vec::new();
        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Record>(&payload) {
                Ok(record) => records.push(record),
                Err(_) => break,
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use ulid::Ulid;

    use crate::model::{DateSpan, Restriction, RestrictionKind};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("lodging_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{name}_{}.wal", Ulid::new()))
    }

    fn block(id: i64, room_id: i64, day: u32) -> Record {
        let start = NaiveDate::from_ymd_opt(2025, 6, day).unwrap();
        let now = Utc::now();
        Record::RestrictionInserted(Restriction {
            id,
            room_id,
            span: DateSpan::one_night(start).unwrap(),
            kind: RestrictionKind::ManualBlock,
            created_at: now,
            updated_at: now,
        })
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay");
        let records = vec![
            Record::RoomAdded { id: 1, name: "General's Quarters".into() },
            block(1, 1, 3),
            Record::RestrictionDeleted { id: 1, room_id: 1 },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for r in &records {
                wal.append(r).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 3);
        }

        assert_eq!(Wal::replay(&path).unwrap(), records);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation");
        let record = Record::RoomAdded { id: 1, name: "Major's Suite".into() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&record).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![record]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc");
        {
            let payload = bincode::serialize(&block(4, 1, 5)).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_at_oversized_length() {
        let path = tmp_path("oversized");
        let room = Record::RoomAdded { id: 1, name: "Loft".into() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&room).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0xAB; 32]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![room]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append");
        let room = Record::RoomAdded { id: 1, name: "Room".into() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&room).unwrap();
            for id in 1..=10 {
                wal.append(&block(id, 1, 1)).unwrap();
                wal.append(&Record::RestrictionDeleted { id, room_id: 1 }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let survivor = block(11, 1, 20);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&room)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&survivor).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted log should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![room, survivor]);
        let _ = fs::remove_file(&path);
    }
}
