use anyhow::{Context, Result};
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

pub fn open_file(filename: &Path) -> Result<String> {
    let file =
        File::open(filename).with_context(|| format!("Failed to open file: {:?}", filename))?;
    let mut reader = BufReader::new(file);
    let mut contents = String::new();
    reader
        .read_to_string(&mut contents)
        .with_context(|| "Failed to read file contents")?;
    Ok(contents)
}

pub fn save_file(filename: &Path, contents: &str) -> Result<()> {
    let dir = filename
        .parent()
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    // Write contents to a temporary file in the same directory first
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {:?}", dir))?;

    file.write_all(contents.as_bytes())
        .with_context(|| "Failed to write content to temporary file")?;

    file.as_file()
        .sync_all()
        .with_context(|| "Failed to sync temporary file")?;

    file.persist(filename)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temporary file to {:?}", filename))?;

    Ok(())
}

/// Parses a `start:end` byte range as given on the command line.
pub fn parse_range(value: &str) -> Result<(usize, usize)> {
    let (start, end) = value
        .split_once(':')
        .with_context(|| format!("Range must look like start:end, got {:?}", value))?;
    let start = start
        .trim()
        .parse()
        .with_context(|| format!("Invalid range start: {:?}", start))?;
    let end = end
        .trim()
        .parse()
        .with_context(|| format!("Invalid range end: {:?}", end))?;
    anyhow::ensure!(start <= end, "Range start {} is after end {}", start, end);
    Ok((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "# Hello").unwrap();

        assert_eq!(open_file(&path).unwrap(), "# Hello");
    }

    #[test]
    fn test_open_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_file(&dir.path().join("missing.md")).is_err());
    }

    #[test]
    fn test_save_file_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.md");
        std::fs::write(&path, "old").unwrap();

        save_file(&path, "new text").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new text");
    }

    #[test]
    fn test_save_file_leaves_sibling_tmp_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        let sibling = dir.path().join("notes.tmp");
        std::fs::write(&sibling, "keep me").unwrap();

        save_file(&path, "# Notes").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Notes");
        assert_eq!(std::fs::read_to_string(&sibling).unwrap(), "keep me");
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("5:13").unwrap(), (5, 13));
        assert_eq!(parse_range(" 0 : 0 ").unwrap(), (0, 0));
        assert!(parse_range("13:5").is_err());
        assert!(parse_range("5-13").is_err());
        assert!(parse_range("a:3").is_err());
    }
}
