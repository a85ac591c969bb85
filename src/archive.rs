//! Expands zipped GPS dumps in place.

use std::fs::{self, File};
use std::path::Path;

use tracing::{error, info};

use crate::error::Result;

/// Extracts every `.zip` directly inside `dir` into `dir`.
///
/// A broken archive is logged and skipped. Returns the number of archives
/// extracted.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn extract_archives(dir: &Path) -> Result<usize> {
    let mut extracted = 0;

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }

        match extract_one(&path, dir) {
            Ok(files) => {
                info!(archive = %path.display(), files, "Archive extracted");
                extracted += 1;
            }
            Err(e) => error!(archive = %path.display(), error = %e, "Archive extraction failed"),
        }
    }

    Ok(extracted)
}

fn extract_one(path: &Path, target: &Path) -> Result<usize> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let files = archive.len();
    archive.extract(target)?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    #[test]
    fn test_extracts_zip_and_skips_broken() {
        let dir = env::temp_dir().join("busline_conditioner_archives");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        {
            let file = File::create(dir.join("dump.zip")).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.start_file("2024-05-12_10.json", SimpleFileOptions::default())
                .unwrap();
            zip.write_all(br#"[{"linha":"107","datahora":"1"}]"#).unwrap();
            zip.finish().unwrap();
        }
        fs::write(dir.join("broken.zip"), b"not a zip").unwrap();

        assert_eq!(extract_archives(&dir).unwrap(), 1);
        assert!(dir.join("2024-05-12_10.json").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
