use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const MARKER_FILE: &str = ".clientvault-id";
const PARTIAL_SUFFIX: &str = ".partial";

pub fn marker_path(dir: &Path) -> PathBuf {
    dir.join(MARKER_FILE)
}

/// Client id recorded in `dir`. A missing or malformed marker reads as `None`.
pub fn read_marker(dir: &Path) -> io::Result<Option<i64>> {
    let raw = match fs::read_to_string(marker_path(dir)) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    Ok(raw.trim().parse::<i64>().ok())
}

pub fn write_marker(dir: &Path, client_id: i64) -> io::Result<()> {
    let target = marker_path(dir);
    let partial = dir.join(format!("{MARKER_FILE}{PARTIAL_SUFFIX}"));
    {
        let mut file = fs::File::create(&partial)?;
        file.write_all(client_id.to_string().as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&partial, &target)
}

pub fn marker_modified(dir: &Path) -> Option<SystemTime> {
    fs::metadata(marker_path(dir))
        .and_then(|meta| meta.modified())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn written_marker_reads_back() {
        let dir = tempdir().unwrap();
        write_marker(dir.path(), 42).unwrap();

        assert_eq!(read_marker(dir.path()).unwrap(), Some(42));
        assert!(!dir.path().join(".clientvault-id.partial").exists());
        assert!(marker_modified(dir.path()).is_some());
    }

    #[test]
    fn marker_content_is_trimmed() {
        let dir = tempdir().unwrap();
        fs::write(marker_path(dir.path()), " 7\n").unwrap();
        assert_eq!(read_marker(dir.path()).unwrap(), Some(7));
    }

    #[test]
    fn missing_or_garbage_marker_is_none() {
        let dir = tempdir().unwrap();
        assert_eq!(read_marker(dir.path()).unwrap(), None);
        fs::write(marker_path(dir.path()), "client seven").unwrap();
        assert_eq!(read_marker(dir.path()).unwrap(), None);
    }

    #[test]
    fn rewrite_replaces_previous_id() {
        let dir = tempdir().unwrap();
        write_marker(dir.path(), 1).unwrap();
        write_marker(dir.path(), 2).unwrap();
        assert_eq!(read_marker(dir.path()).unwrap(), Some(2));
    }
}
