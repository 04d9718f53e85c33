use chrono::Local;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

use tracing::debug;

use crate::Summary;
use crate::bigint::{ArithmeticError, BigInt};
use crate::plan::Segment;
use crate::primes::SegmentPrimes;

/// Directory segment files land in when the caller does not pick one.
pub const DEFAULT_OUTPUT_DIR: &str = "primes";

const WRITE_BUFFER: usize = 128 * 1024;

/// Destination for sieved segments. Implementations are shared by every
/// worker of a run, so each one owns whatever locking it needs.
pub trait PrimeSink: Sync {
    fn write_segment(&self, primes: SegmentPrimes) -> io::Result<()>;

    /// The run is stopping early; segments still waiting on a lower one
    /// must give up.
    fn abort(&self) {}

    /// Called once after all workers have joined.
    fn finish(&self) -> io::Result<()> {
        Ok(())
    }
}

/// `<label>bit_primes_<low>_<high>.txt`
pub fn segment_file_name(label: u32, segment: &Segment) -> String {
    format!("{}bit_primes_{}_{}.txt", label, segment.low, segment.high)
}

/// `<label>bit_primes.txt`
pub fn shared_file_name(label: u32) -> String {
    format!("{label}bit_primes.txt")
}

fn open_truncated(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    Ok(BufWriter::with_capacity(WRITE_BUFFER, file))
}

/// One file per segment, named by its bounds. Workers never contend.
pub struct SegmentFiles {
    dir: PathBuf,
    label: u32,
}

impl SegmentFiles {
    pub fn new(dir: impl Into<PathBuf>, label: u32) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(SegmentFiles { dir, label })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, segment: &Segment) -> PathBuf {
        self.dir.join(segment_file_name(self.label, segment))
    }
}

impl PrimeSink for SegmentFiles {
    fn write_segment(&self, primes: SegmentPrimes) -> io::Result<()> {
        let path = self.path_for(&primes.segment);
        let mut writer = open_truncated(&path)?;
        primes.write_decimal(&mut writer)?;
        writer.flush()?;
        debug!(path = %path.display(), primes = primes.len(), "segment written");
        Ok(())
    }
}

struct SharedState {
    writer: BufWriter<File>,
    // Index of the segment whose turn it is to write
    next_expected: usize,
    broken: bool,
}

/// One file for the whole run. A segment is written by its own caller once
/// every lower segment has been written, so the file is ascending
/// regardless of the order workers finish in. Callers ahead of their turn
/// wait; nothing is buffered on their behalf.
pub struct SharedFile {
    path: PathBuf,
    state: Mutex<SharedState>,
    turn: Condvar,
}

impl SharedFile {
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = open_truncated(&path)?;
        Ok(SharedFile {
            path,
            state: Mutex::new(SharedState {
                writer,
                next_expected: 0,
                broken: false,
            }),
            turn: Condvar::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn broken_stream(path: &Path) -> io::Error {
    io::Error::other(format!("{} failed earlier in this run", path.display()))
}

impl PrimeSink for SharedFile {
    /// Blocks until `primes` is the next segment in index order, then writes
    /// and flushes it. `Ok` means its lines reached the file.
    fn write_segment(&self, primes: SegmentPrimes) -> io::Result<()> {
        let index = primes.segment.index;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if state.broken {
                return Err(broken_stream(&self.path));
            }
            if index < state.next_expected {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("segment {index} was already written"),
                ));
            }
            if index == state.next_expected {
                break;
            }
            state = self
                .turn
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let result = primes
            .write_decimal(&mut state.writer)
            .and_then(|_| state.writer.flush());
        match result {
            Ok(()) => state.next_expected += 1,
            Err(_) => state.broken = true,
        }
        self.turn.notify_all();
        result
    }

    fn abort(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.broken = true;
        self.turn.notify_all();
    }

    fn finish(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.broken {
            return Err(broken_stream(&self.path));
        }
        state.writer.flush()
    }
}

/// Keeps every segment in memory, keyed by index.
#[derive(Default)]
pub struct MemorySink {
    segments: Mutex<BTreeMap<usize, SegmentPrimes>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_segments(self) -> Vec<SegmentPrimes> {
        self.segments
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_values()
            .collect()
    }

    /// All primes collected so far, merged in segment order.
    pub fn primes(&self) -> Result<Vec<BigInt>, ArithmeticError> {
        let segments = self.segments.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all = Vec::new();
        for seg in segments.values() {
            all.extend(seg.values()?);
        }
        Ok(all)
    }
}

impl PrimeSink for MemorySink {
    fn write_segment(&self, primes: SegmentPrimes) -> io::Result<()> {
        self.segments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(primes.segment.index, primes);
        Ok(())
    }
}

/// A segment file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFile {
    pub path: PathBuf,
    pub low: BigInt,
    pub high: BigInt,
}

/// Inverse of [`segment_file_name`].
pub fn parse_segment_file_name(name: &str, label: u32) -> Option<(BigInt, BigInt)> {
    let prefix = format!("{label}bit_primes_");
    let bounds = name.strip_prefix(&prefix)?.strip_suffix(".txt")?;
    let (low, high) = bounds.split_once('_')?;
    Some((low.parse().ok()?, high.parse().ok()?))
}

/// Segment files for `label` in `dir`, ordered by lower bound.
pub fn read_segment_files(dir: &Path, label: u32) -> io::Result<Vec<SegmentFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some((low, high)) = parse_segment_file_name(name, label) {
            files.push(SegmentFile {
                path: entry.path(),
                low,
                high,
            });
        }
    }
    files.sort_by(|a, b| a.low.cmp(&b.low));
    Ok(files)
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Concatenate a run's segment files in boundary order into `out`, checking
/// that they tile one contiguous range. Returns the number of primes copied.
pub fn merge_segment_files<W: Write>(dir: &Path, label: u32, out: &mut W) -> io::Result<u64> {
    let files = read_segment_files(dir, label)?;
    if files.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no {label}-bit segment files in {}", dir.display()),
        ));
    }

    for pair in files.windows(2) {
        let expected = pair[0].high.checked_add_u64(1).map_err(io::Error::other)?;
        if pair[1].low != expected {
            return Err(invalid_data(format!(
                "gap or overlap between {} and {}",
                pair[0].path.display(),
                pair[1].path.display()
            )));
        }
    }

    let mut count = 0;
    for file in &files {
        let reader = BufReader::new(File::open(&file.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
            count += 1;
        }
    }
    out.flush()?;
    Ok(count)
}

/// Read back every prime for `label` in `dir`, in ascending order.
pub fn load_primes(dir: &Path, label: u32) -> io::Result<Vec<BigInt>> {
    let mut primes = Vec::new();
    for file in read_segment_files(dir, label)? {
        let content = fs::read_to_string(&file.path)?;
        for line in content.lines().filter(|l| !l.is_empty()) {
            let value = line
                .parse()
                .map_err(|e| invalid_data(format!("{}: {e}", file.path.display())))?;
            primes.push(value);
        }
    }
    Ok(primes)
}

/// Append one line per run to `execution_log.txt` in `dir`.
pub fn log_execution(
    dir: &Path,
    label: u32,
    threads: usize,
    segment_size: u64,
    summary: &Summary,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;

    let log_path = dir.join("execution_log.txt");
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");

    writeln!(
        file,
        "{} | {}bit | limit {} | {} threads | segment {} | {} primes | {}us",
        timestamp,
        label,
        summary.limit,
        threads,
        segment_size,
        summary.primes,
        summary.elapsed.as_micros()
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primes::{base_primes, sieve_segment};
    use std::time::Duration;

    fn sieved(index: usize, low: u64, high: u64, limit: u64) -> SegmentPrimes {
        let base = base_primes(&BigInt::from(limit)).unwrap();
        let segment = Segment {
            index,
            low: BigInt::from(low),
            high: BigInt::from(high),
        };
        sieve_segment(&segment, &base).unwrap()
    }

    #[test]
    fn file_names_round_trip() {
        let seg = Segment {
            index: 0,
            low: BigInt::from(2u64),
            high: BigInt::from(10_001u64),
        };
        let name = segment_file_name(24, &seg);
        assert_eq!(name, "24bit_primes_2_10001.txt");
        assert_eq!(
            parse_segment_file_name(&name, 24),
            Some((seg.low, seg.high))
        );
        assert_eq!(parse_segment_file_name(&name, 32), None);
        assert_eq!(parse_segment_file_name("24bit_primes.txt", 24), None);
        assert_eq!(parse_segment_file_name("24bit_primes_2_x.txt", 24), None);
    }

    #[test]
    fn segment_files_write_one_file_each() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SegmentFiles::new(dir.path().join("out"), 6).unwrap();
        sink.write_segment(sieved(1, 22, 41, 50)).unwrap();
        sink.write_segment(sieved(0, 2, 21, 50)).unwrap();

        let files = read_segment_files(sink.dir(), 6).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].low, BigInt::from(2u64));
        assert_eq!(
            fs::read_to_string(&files[1].path).unwrap(),
            "23\n29\n31\n37\n41\n"
        );
    }

    #[test]
    fn shared_file_orders_out_of_order_writers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(shared_file_name(6));
        let sink = SharedFile::create(&path).unwrap();

        std::thread::scope(|scope| {
            let late = scope.spawn(|| sink.write_segment(sieved(2, 32, 50, 50)));
            let middle = scope.spawn(|| sink.write_segment(sieved(1, 17, 31, 50)));
            std::thread::sleep(Duration::from_millis(50));
            // Both are waiting for segment 0
            assert!(!late.is_finished() && !middle.is_finished());
            assert_eq!(fs::read_to_string(&path).unwrap(), "");

            sink.write_segment(sieved(0, 2, 16, 50)).unwrap();
            late.join().unwrap().unwrap();
            middle.join().unwrap().unwrap();
        });

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "2\n3\n5\n7\n11\n13\n17\n19\n23\n29\n31\n37\n41\n43\n47\n"
        );
        sink.finish().unwrap();
    }

    #[test]
    fn shared_file_write_is_on_disk_when_it_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(shared_file_name(6));
        let sink = SharedFile::create(&path).unwrap();
        sink.write_segment(sieved(0, 2, 9, 9)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "2\n3\n5\n7\n");

        let err = sink.write_segment(sieved(0, 2, 9, 9)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn shared_file_abort_releases_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SharedFile::create(dir.path().join(shared_file_name(6))).unwrap();

        std::thread::scope(|scope| {
            let waiting = scope.spawn(|| sink.write_segment(sieved(3, 40, 50, 50)));
            std::thread::sleep(Duration::from_millis(20));
            sink.abort();
            assert!(waiting.join().unwrap().is_err());
        });
        assert!(sink.write_segment(sieved(0, 2, 16, 50)).is_err());
        assert!(sink.finish().is_err());
    }

    #[test]
    fn memory_sink_merges_by_index() {
        let sink = MemorySink::new();
        sink.write_segment(sieved(1, 12, 21, 21)).unwrap();
        sink.write_segment(sieved(0, 2, 11, 21)).unwrap();
        let primes: Vec<u64> = sink
            .primes()
            .unwrap()
            .iter()
            .map(|p| p.to_u64().unwrap())
            .collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert_eq!(sink.into_segments().len(), 2);
    }

    #[test]
    fn merge_concatenates_in_bound_order() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SegmentFiles::new(dir.path(), 6).unwrap();
        // 2..=9 sorts after 10..=19 as a string; merge must order numerically.
        sink.write_segment(sieved(1, 10, 19, 19)).unwrap();
        sink.write_segment(sieved(0, 2, 9, 19)).unwrap();

        let mut out = Vec::new();
        let count = merge_segment_files(dir.path(), 6, &mut out).unwrap();
        assert_eq!(count, 8);
        assert_eq!(String::from_utf8(out).unwrap(), "2\n3\n5\n7\n11\n13\n17\n19\n");
        assert_eq!(load_primes(dir.path(), 6).unwrap().len(), 8);
    }

    #[test]
    fn merge_rejects_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SegmentFiles::new(dir.path(), 6).unwrap();
        sink.write_segment(sieved(0, 2, 9, 30)).unwrap();
        sink.write_segment(sieved(2, 20, 30, 30)).unwrap();

        let err = merge_segment_files(dir.path(), 6, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn merge_without_files_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_segment_files(dir.path(), 6, &mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn execution_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        let summary = Summary {
            limit: BigInt::from(100u64),
            segments: 1,
            primes: 25,
            elapsed: std::time::Duration::from_micros(42),
        };
        log_execution(dir.path(), 7, 2, 1000, &summary).unwrap();
        log_execution(dir.path(), 7, 2, 1000, &summary).unwrap();
        let log = fs::read_to_string(dir.path().join("execution_log.txt")).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("| 7bit | limit 100 | 2 threads | segment 1000 | 25 primes | 42us"));
    }
}
