//! Snapshot export: one `ProcessRecord` per line, published atomically via a
//! temp file in the destination directory and a rename.

use crate::collectors::ProcessRecord;
use crate::error::{Result, SentinelError};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `records` to `path`, replacing any existing file in one step.
pub fn write_snapshot(path: &Path, records: &[ProcessRecord]) -> Result<usize> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut w = BufWriter::new(tmp.as_file());
        for r in records {
            serde_json::to_writer(&mut w, r)?;
            w.write_all(b"\n")?;
        }
        w.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(records.len())
}

pub fn read_snapshot(path: &Path) -> Result<Vec<ProcessRecord>> {
    let failed = |source: std::io::Error| SentinelError::SnapshotRead {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(failed)?;
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(failed)?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(&line).map_err(|e| failed(e.into()))?);
    }
    Ok(out)
}
