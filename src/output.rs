//! Persistence for pipeline artifacts.
//!
//! Line sequences and cleaned routes are single well-formed JSON arrays,
//! written incrementally. Per-file sorted runs are newline-delimited JSON so
//! they can be read back one record at a time. Tables go to CSV.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use csv::WriterBuilder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::Result;
use crate::ping::Ping;

/// Makes an identifier safe to embed in a file name.
///
/// Percent-encoding keeps distinct identifiers distinct. `_` and `.` are
/// encoded as well, so they stay free as separators in composed names.
pub fn file_safe(id: &str) -> String {
    urlencoding::encode(id)
        .replace('_', "%5F")
        .replace('.', "%2E")
}

/// Streams values into a JSON array file.
pub struct JsonArrayWriter {
    out: BufWriter<File>,
    count: usize,
}

impl JsonArrayWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(b"[")?;
        Ok(Self { out, count: 0 })
    }

    pub fn write<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if self.count > 0 {
            self.out.write_all(b",\n")?;
        } else {
            self.out.write_all(b"\n")?;
        }
        serde_json::to_writer(&mut self.out, value)?;
        self.count += 1;
        Ok(())
    }

    /// Closes the array and flushes. Returns the number of values written.
    pub fn finish(mut self) -> Result<usize> {
        self.out.write_all(b"\n]\n")?;
        self.out.flush()?;
        Ok(self.count)
    }
}

/// Writes `items` as one JSON array.
pub fn write_json_array<'a, T, I>(path: &Path, items: I) -> Result<usize>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut writer = JsonArrayWriter::create(path)?;
    for item in items {
        writer.write(item)?;
    }
    writer.finish()
}

/// Reads a JSON array file.
pub fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Writes a sorted run, one ping per line.
pub fn write_run(path: &Path, pings: &[Ping]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for ping in pings {
        serde_json::to_writer(&mut out, ping)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    debug!(path = %path.display(), records = pings.len(), "Run written");
    Ok(())
}

/// Reads a sorted run lazily. Lines that fail to parse are logged and skipped.
pub fn read_run(path: &Path) -> Result<impl Iterator<Item = Ping> + use<>> {
    let reader = BufReader::new(File::open(path)?);
    let shown = path.display().to_string();

    Ok(reader
        .lines()
        .enumerate()
        .filter_map(move |(n, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!(run = %shown, line = n + 1, error = %e, "Run read failed");
                    return None;
                }
            };
            if line.trim().is_empty() {
                return None;
            }
            match serde_json::from_str::<Ping>(&line) {
                Ok(ping) => Some(ping),
                Err(e) => {
                    warn!(run = %shown, line = n + 1, error = %e, "Skipping bad run record");
                    None
                }
            }
        }))
}

/// Writes rows to a CSV file with a header, replacing any previous content.
pub fn write_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "CSV written");
    Ok(())
}

/// Reads every row of a headed CSV file.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        rows.push(result?);
    }
    Ok(rows)
}
