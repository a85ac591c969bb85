//! Decoder and repairer for raw GPS dumps.
//!
//! Dumps come in three shapes: a proper JSON array, newline-delimited
//! objects, or several arrays written back to back without separators (the
//! result of appending one array per line to the same file). All three are
//! read as a stream of top-level JSON values: arrays are flattened, bare
//! objects are taken as records. Because the stream tokenizer understands
//! string literals, a `]\n[` inside a value is never mistaken for a junction.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::ping::RawPing;

/// Reads `text` as zero or more adjacent top-level JSON values and returns
/// the flattened list of entries.
///
/// Values may be separated by whitespace or by a single comma, so
/// `{"a":1},{"a":2}` reads the same as `[{"a":1},{"a":2}]`. A trailing comma
/// is tolerated.
///
/// # Errors
///
/// Returns the underlying syntax error if any top-level value is malformed,
/// or a custom error if a top-level value is neither an array nor an object.
pub fn parse_values(text: &str) -> std::result::Result<Vec<Value>, serde_json::Error> {
    let mut entries = Vec::new();
    let mut offset = skip_whitespace(text, 0);

    while offset < text.len() {
        let mut stream = serde_json::Deserializer::from_str(&text[offset..]).into_iter::<Value>();
        let Some(value) = stream.next() else {
            break;
        };
        match value? {
            Value::Array(items) => entries.extend(items),
            object @ Value::Object(_) => entries.push(object),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "unexpected top-level value {other}"
                )));
            }
        }

        offset = skip_whitespace(text, offset + stream.byte_offset());
        if text[offset..].starts_with(',') {
            offset = skip_whitespace(text, offset + 1);
        }
    }

    Ok(entries)
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    let rest = &text[from..];
    from + (rest.len() - rest.trim_start_matches([' ', '\n', '\r', '\t']).len())
}

/// Rewrites concatenated arrays as one well-formed array.
///
/// `[{"a":1}]\n[{"a":2}]` becomes `[{"a":1},{"a":2}]`.
pub fn repair_text(text: &str) -> std::result::Result<String, serde_json::Error> {
    let entries = parse_values(text)?;
    serde_json::to_string(&entries)
}

/// Decodes every entry that looks like a ping. Entries that are not objects
/// or carry wrongly-typed fields are dropped.
pub fn decode_pings(text: &str) -> std::result::Result<Vec<RawPing>, serde_json::Error> {
    let entries = parse_values(text)?;
    let total = entries.len();

    let pings: Vec<RawPing> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<RawPing>(entry) {
            Ok(ping) => Some(ping),
            Err(e) => {
                debug!(error = %e, "Dropping malformed entry");
                None
            }
        })
        .collect();

    if pings.len() < total {
        debug!(dropped = total - pings.len(), kept = pings.len(), "Malformed entries dropped");
    }

    Ok(pings)
}

/// Reads a dump from disk, transparently gunzipping `.gz` files.
pub fn read_dump(path: &Path) -> Result<String> {
    let mut text = String::new();
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        GzDecoder::new(File::open(path)?).read_to_string(&mut text)?;
    } else {
        File::open(path)?.read_to_string(&mut text)?;
    }
    Ok(text)
}

/// Decodes a dump file into raw pings.
///
/// # Errors
///
/// [`PipelineError::Decode`] naming the file when the content cannot be read
/// as JSON values.
pub fn decode_file(path: &Path) -> Result<Vec<RawPing>> {
    let text = read_dump(path)?;
    decode_pings(&text).map_err(|e| PipelineError::decode(path, e))
}

/// Repairs a file in place.
///
/// The repaired content is written to a sibling temp file and renamed over
/// the original, so a failure leaves the source untouched.
#[tracing::instrument(skip_all, fields(file = %path.display()))]
pub fn repair_file(path: &Path) -> Result<()> {
    let text = fs::read_to_string(path)?;
    let repaired = repair_text(&text).map_err(|e| PipelineError::decode(path, e))?;

    let tmp = path.with_extension("json.repairing");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(repaired.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    info!("File repaired");
    Ok(())
}
