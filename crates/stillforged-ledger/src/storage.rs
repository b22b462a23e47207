//! On-disk layout of the ledger: primary JSON store and line journal.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use stillforged_common::{ConversionRecord, Error, Result};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Read every record from the primary store.
///
/// A missing file is an empty ledger. A file that does not parse is an error:
/// unlike the journal, the primary store is only ever replaced atomically.
pub(crate) async fn read_primary(path: &Path) -> Result<Vec<ConversionRecord>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&content).map_err(|e| {
        Error::ledger(format!(
            "Failed to parse ledger store {}: {}",
            path.display(),
            e
        ))
    })
}

/// Replace the primary store with `records`.
///
/// Returns only once both the new contents and the rename are on disk, so
/// the journal may be truncated afterwards.
pub(crate) async fn write_primary(path: &Path, records: &[ConversionRecord]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(records)?;
    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(json.as_bytes()).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    sync_dir(parent.unwrap_or_else(|| Path::new("."))).await
}

/// Persist directory entries (renames) in `dir`.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Journal contents recovered on load.
pub(crate) struct JournalScan {
    pub records: Vec<ConversionRecord>,
    pub lines: usize,
    pub malformed: usize,
}

/// Read all parseable records from the journal.
///
/// Lines that do not parse (typically a write torn by a crash) are skipped
/// with a warning.
pub(crate) async fn read_journal(path: &Path) -> Result<JournalScan> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let mut scan = JournalScan {
        records: Vec::new(),
        lines: 0,
        malformed: 0,
    };

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        scan.lines += 1;
        match serde_json::from_str::<ConversionRecord>(line) {
            Ok(record) => scan.records.push(record),
            Err(e) => {
                scan.malformed += 1;
                tracing::warn!(
                    journal = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed journal line"
                );
            }
        }
    }

    Ok(scan)
}

/// Append one record to the journal and sync it to disk.
///
/// A torn tail left by a crash is terminated first, so the record always
/// starts on its own line.
pub(crate) async fn append_journal(path: &Path, record: &ConversionRecord) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await?;

    let mut line = String::new();
    if ends_mid_line(&mut file).await? {
        line.push('\n');
    }
    line.push_str(&serde_json::to_string(record)?);
    line.push('\n');

    file.write_all(line.as_bytes()).await?;
    file.sync_data().await?;
    Ok(())
}

/// Whether a non-empty file lacks a trailing newline.
async fn ends_mid_line(file: &mut fs::File) -> Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    Ok(file.read_u8().await? != b'\n')
}

/// Empty the journal once its records are in the primary store.
pub(crate) async fn truncate_journal(path: &Path) -> Result<()> {
    match fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)
        .await
    {
        Ok(file) => {
            file.sync_all().await?;
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(key: &str) -> ConversionRecord {
        ConversionRecord {
            source_key: key.to_string(),
            target_key: format!("{}.webp", key),
            converted_at: Utc::now(),
            original_size: 100,
            converted_size: 50,
            compression_ratio: 0.5,
        }
    }

    #[tokio::test]
    async fn test_missing_files_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let primary = read_primary(&dir.path().join("none.json")).await.unwrap();
        assert!(primary.is_empty());

        let scan = read_journal(&dir.path().join("none.journal")).await.unwrap();
        assert!(scan.records.is_empty());
        assert_eq!(scan.lines, 0);
    }

    #[tokio::test]
    async fn test_primary_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.json");

        write_primary(&path, &[record("a"), record("b")]).await.unwrap();
        let records = read_primary(&path).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].source_key, "b");
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn test_corrupt_primary_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "[{\"sourceKey\":").unwrap();

        let err = read_primary(&path).await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
    }

    #[tokio::test]
    async fn test_journal_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.journal");

        append_journal(&path, &record("a")).await.unwrap();
        append_journal(&path, &record("b")).await.unwrap();
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"sourceKey\":\"c\",\"targ");
        std::fs::write(&path, content).unwrap();

        let scan = read_journal(&path).await.unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.lines, 3);
        assert_eq!(scan.malformed, 1);

        truncate_journal(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[tokio::test]
    async fn test_append_after_torn_tail_starts_new_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.journal");
        std::fs::write(&path, "{\"sourceKey\":\"torn").unwrap();

        append_journal(&path, &record("a")).await.unwrap();
        append_journal(&path, &record("b")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with('\n'));
        assert_eq!(content.lines().count(), 3);

        let scan = read_journal(&path).await.unwrap();
        let keys: Vec<_> = scan.records.iter().map(|r| r.source_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(scan.malformed, 1);
    }

    #[tokio::test]
    async fn test_primary_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");

        write_primary(&path, &[record("a"), record("b"), record("c")])
            .await
            .unwrap();
        write_primary(&path, &[record("d")]).await.unwrap();

        let records = read_primary(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_key, "d");
        assert!(!temp_path(&path).exists());
    }
}
