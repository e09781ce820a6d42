use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode][u32 crc32]`, little endian.
fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the file ended first.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact frame, or `None` at end of file, a torn tail, or the first
/// corrupt frame.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(bincode::deserialize(&payload).ok())
}

/// Append-only journal of venue events.
///
/// Every committed write is a batch of frames followed by one fsync. A crash
/// mid-batch leaves a torn tail that replay drops.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Durably append `events`; returns once they are on disk.
    pub fn commit(&mut self, events: &[Event]) -> io::Result<()> {
        let mut result = Ok(());
        for event in events {
            if let Err(e) = write_frame(&mut self.writer, event) {
                result = Err(e);
                break;
            }
        }
        // Flush even after a failed frame so nothing half-buffered leaks
        // into the next commit.
        let synced = self
            .writer
            .flush()
            .and_then(|()| self.writer.get_ref().sync_all());
        result?;
        synced?;
        self.appends_since_compact += events.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `snapshot` via temp file and rename.
    pub fn rewrite(&mut self, snapshot: &[Event]) -> io::Result<()> {
        let tmp = self.path.with_extension("journal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for event in snapshot {
                write_frame(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact event in order. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_frame(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReservationStatus, SeatBlock, Span};
    use ulid::Ulid;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("venuebook_test_journal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn block_added(venue_id: Ulid) -> Event {
        Event::SeatBlockAdded(SeatBlock {
            id: Ulid::new(),
            venue_id,
            seat_id: None,
            span: Span::new(1_000, 2_000),
            reason: Some("maintenance".into()),
        })
    }

    #[test]
    fn commit_and_replay() {
        let path = scratch("commit_and_replay.journal");
        let venue_id = Ulid::new();
        let events = vec![
            block_added(venue_id),
            Event::ReservationStatusChanged {
                id: Ulid::new(),
                venue_id,
                status: ReservationStatus::Cancelled,
            },
        ];
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.commit(&events[..1]).unwrap();
            journal.commit(&events[1..]).unwrap();
            assert_eq!(journal.appends_since_compact(), 2);
        }
        assert_eq!(Journal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn missing_file_is_empty() {
        let path = scratch("never_written.journal");
        assert!(Journal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = scratch("torn_tail.journal");
        let event = block_added(Ulid::new());
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.commit(std::slice::from_ref(&event)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            // Length prefix claims 64 bytes, only 3 follow.
            f.write_all(&64u32.to_le_bytes()).unwrap();
            f.write_all(&[1, 2, 3]).unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = scratch("bad_checksum.journal");
        let good = block_added(Ulid::new());
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.commit(std::slice::from_ref(&good)).unwrap();
        }
        {
            let payload = bincode::serialize(&block_added(Ulid::new())).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert_eq!(Journal::replay(&path).unwrap(), vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn rewrite_shrinks_and_accepts_appends() {
        let path = scratch("rewrite.journal");
        let venue_id = Ulid::new();
        let keep = block_added(venue_id);
        let mut journal = Journal::open(&path).unwrap();
        for _ in 0..20 {
            let churn = block_added(venue_id);
            let id = match &churn {
                Event::SeatBlockAdded(b) => b.id,
                _ => unreachable!(),
            };
            journal
                .commit(&[churn, Event::SeatBlockRemoved { id, venue_id }])
                .unwrap();
        }
        journal.commit(std::slice::from_ref(&keep)).unwrap();
        let before = fs::metadata(&path).unwrap().len();

        journal.rewrite(std::slice::from_ref(&keep)).unwrap();
        assert_eq!(journal.appends_since_compact(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "{after} should be < {before}");

        let later = block_added(venue_id);
        journal.commit(std::slice::from_ref(&later)).unwrap();
        drop(journal);
        assert_eq!(Journal::replay(&path).unwrap(), vec![keep, later]);
        let _ = fs::remove_file(&path);
    }
}
