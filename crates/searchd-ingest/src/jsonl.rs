//! File-backed change source.
//!
//! The snapshot directory holds one `<collection>.jsonl` file per collection,
//! one entity object (with a numeric `id`) per line. Changes are appended to a
//! single log of [`ChangeRecord`] lines that is consumed from a remembered
//! byte offset.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};
use walkdir::WalkDir;

use searchd_core::{ChangeEvent, Error, Result};

use crate::{ChangeRecord, ChangeSource, Fill};

const SNAPSHOT_EXT: &str = "jsonl";

#[derive(Debug)]
pub struct JsonlSource {
    snapshot_dir: PathBuf,
    changes_file: PathBuf,
    offset: Mutex<u64>,
}

impl JsonlSource {
    pub fn new(snapshot_dir: impl Into<PathBuf>, changes_file: impl Into<PathBuf>) -> Self {
        Self { snapshot_dir: snapshot_dir.into(), changes_file: changes_file.into(), offset: Mutex::new(0) }
    }

    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    pub fn changes_file(&self) -> &Path {
        &self.changes_file
    }

    fn feed_err(&self, op: &'static str, path: &Path, source: io::Error) -> Error {
        Error::Feed { op, path: path.to_path_buf(), source }
    }

    fn log_len(&self) -> Result<u64> {
        match std::fs::metadata(&self.changes_file) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.feed_err("stat", &self.changes_file, e)),
        }
    }

    fn snapshot_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.snapshot_dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| self.feed_err("fill", &self.snapshot_dir, io::Error::from(e)))?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            if let Some(collection) = path.file_stem().and_then(|s| s.to_str()) {
                files.push((collection.to_string(), path.to_path_buf()));
            }
        }
        Ok(files)
    }
}

fn snapshot_entity(collection: &str, path: &Path, line_no: usize, mut raw: Vec<u8>) -> Option<ChangeEvent> {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    if raw.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    let line = match String::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            warn!(path = %path.display(), line = line_no, error = %e, "skipping snapshot line that is not UTF-8");
            return None;
        }
    };
    let value: serde_json::Value = match serde_json::from_str(&line) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), line = line_no, error = %e, "skipping malformed snapshot line");
            return None;
        }
    };
    let Some(id) = value.get("id").and_then(serde_json::Value::as_u64) else {
        warn!(path = %path.display(), line = line_no, "skipping snapshot entity without numeric id");
        return None;
    };
    Some(ChangeEvent::added(collection, id, line.into_bytes()))
}

fn read_snapshot(collection: String, path: PathBuf) -> Box<dyn Iterator<Item = Result<ChangeEvent>> + Send> {
    let file = match File::open(&path) {
        Ok(f) => f,
        Err(source) => return Box::new(std::iter::once(Err(Error::Feed { op: "fill", path, source }))),
    };
    let lines = BufReader::new(file).split(b'\n').enumerate();
    Box::new(lines.filter_map(move |(idx, line)| match line {
        Ok(raw) => snapshot_entity(&collection, &path, idx + 1, raw).map(Ok),
        Err(source) => Some(Err(Error::Feed { op: "fill", path: path.clone(), source })),
    }))
}

fn parse_change(line: &[u8]) -> std::result::Result<ChangeEvent, String> {
    let record: ChangeRecord = serde_json::from_slice(line).map_err(|e| e.to_string())?;
    record.into_event().map_err(|e| e.to_string())
}

impl ChangeSource for JsonlSource {
    fn fill(&self) -> Result<Fill<'_>> {
        let mut offset = self.offset.lock();
        *offset = self.log_len()?;
        let files = self.snapshot_files()?;
        debug!(files = files.len(), changes_offset = *offset, "jsonl fill");
        Ok(Box::new(files.into_iter().flat_map(|(collection, path)| read_snapshot(collection, path))))
    }

    fn drain(&self) -> Result<Vec<ChangeEvent>> {
        let mut offset = self.offset.lock();
        let mut file = match File::open(&self.changes_file) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.feed_err("open", &self.changes_file, e)),
        };
        let len = file.metadata().map_err(|e| self.feed_err("stat", &self.changes_file, e))?.len();
        if len < *offset {
            warn!(path = %self.changes_file.display(), len, offset = *offset, "change log shrank, rereading from start");
            *offset = 0;
        }
        file.seek(SeekFrom::Start(*offset)).map_err(|e| self.feed_err("seek", &self.changes_file, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| self.feed_err("read", &self.changes_file, e))?;

        // A trailing partial line belongs to a writer still appending.
        let Some(end) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let mut events = Vec::new();
        for line in buf[..end].split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match parse_change(line) {
                Ok(event) => events.push(event),
                Err(error) => warn!(path = %self.changes_file.display(), %error, "skipping malformed change line"),
            }
        }
        *offset += end as u64 + 1;
        Ok(events)
    }
}
