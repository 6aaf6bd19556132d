//! Durable cursor → timestamp document.
//!
//! The whole document is read on every access and replaced wholesale on
//! every write (unique temp file, `fsync`, rename), so a crash mid-write
//! leaves the previous document intact.  Read-modify-write cycles hold an
//! exclusive lock on a sibling `.lock` file, which serializes writers across
//! processes sharing the document as well as within one.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::CheckpointError;

/// Cursor advanced by calendar-scheduled digests.
pub const SCHEDULED_CURSOR: &str = "scheduled";
/// Cursor advanced by on-demand digests.
pub const MANUAL_CURSOR: &str = "manual";

/// Flat `{ "cursor": "ISO-8601" | null }` document.
pub type CheckpointDocument = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

/// Exclusive claim on a run key, released when dropped.
#[derive(Debug)]
pub struct RunClaim {
    _file: File,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full document.  A missing (or blank) file is an empty
    /// document; anything that is not a flat object of strings/nulls is
    /// [`CheckpointError::Corrupt`].
    pub async fn load_all(&self) -> Result<CheckpointDocument, CheckpointError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => parse_document(&self.path, &raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(CheckpointDocument::new())
            }
            Err(source) => Err(io_error(&self.path, source)),
        }
    }

    /// Exclusive lower bound recorded for `cursor`, or `None` if it never ran.
    pub async fn get(&self, cursor: &str) -> Result<Option<DateTime<Utc>>, CheckpointError> {
        let document = self.load_all().await?;
        match document.get(cursor) {
            Some(Some(value)) => parse_timestamp(cursor, value).map(Some),
            _ => Ok(None),
        }
    }

    /// Unconditionally record `at` for `cursor`, preserving all other cursors.
    pub async fn set(&self, cursor: &str, at: DateTime<Utc>) -> Result<(), CheckpointError> {
        let cursor = cursor.to_string();
        self.update(move |document| {
            document.insert(cursor, Some(format_timestamp(at)));
            Ok(((), true))
        })
        .await
    }

    /// Move `cursor` forward to `at`.  A value earlier than the stored one is
    /// ignored, so the cursor never regresses.  Returns the value in effect
    /// after the call.
    pub async fn advance(
        &self,
        cursor: &str,
        at: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, CheckpointError> {
        let cursor = cursor.to_string();
        self.update(move |document| {
            let current = match document.get(&cursor) {
                Some(Some(value)) => Some(parse_timestamp(&cursor, value)?),
                _ => None,
            };
            if let Some(current) = current {
                if at < current {
                    warn!(
                        cursor = %cursor,
                        stored = %format_timestamp(current),
                        requested = %format_timestamp(at),
                        "checkpoint advance ignored: requested value is older than stored value"
                    );
                    return Ok((current, false));
                }
            }
            debug!(cursor = %cursor, at = %format_timestamp(at), "checkpoint advanced");
            document.insert(cursor, Some(format_timestamp(at)));
            Ok((at, true))
        })
        .await
    }

    /// Clear `cursor` back to first-run state.  Returns whether it held a value.
    pub async fn reset(&self, cursor: &str) -> Result<bool, CheckpointError> {
        let cursor = cursor.to_string();
        self.update(move |document| {
            let had_value = matches!(document.get(&cursor), Some(Some(_)));
            document.insert(cursor, None);
            Ok((had_value, true))
        })
        .await
    }

    /// Try to claim `key` for one run without waiting.  `None` means another
    /// holder, in this process or another, has it.
    pub fn try_claim(&self, key: &str) -> Result<Option<RunClaim>, CheckpointError> {
        let path = sibling(&self.path, &format!("{key}.run"));
        ensure_parent(&self.path)?;
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(RunClaim { _file: file })),
            Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                Ok(None)
            }
            Err(source) => Err(io_error(&path, source)),
        }
    }

    /// Apply `apply` to the document under the write lock.  The closure
    /// returns its result and whether the document must be written back.
    async fn update<R, F>(&self, apply: F) -> Result<R, CheckpointError>
    where
        F: FnOnce(&mut CheckpointDocument) -> Result<(R, bool), CheckpointError> + Send + 'static,
        R: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let _lock = lock_document(&path)?;
            let mut document = read_document(&path)?;
            let (result, dirty) = apply(&mut document)?;
            if dirty {
                write_document(&path, &document)?;
            }
            Ok(result)
        })
        .await
        .map_err(|err| io_error(&self.path, std::io::Error::other(err)))?
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "checkpoints.json".to_string());
    path.with_file_name(format!("{filename}.{suffix}"))
}

fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

fn ensure_parent(path: &Path) -> Result<(), CheckpointError> {
    let parent = parent_dir(path);
    std::fs::create_dir_all(parent).map_err(|source| io_error(parent, source))
}

fn open_lock_file(path: &Path) -> Result<File, CheckpointError> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(|source| io_error(path, source))
}

/// Block until the document's write lock is held.
fn lock_document(path: &Path) -> Result<File, CheckpointError> {
    ensure_parent(path)?;
    let lock_path = sibling(path, "lock");
    let file = open_lock_file(&lock_path)?;
    file.lock_exclusive()
        .map_err(|source| io_error(&lock_path, source))?;
    Ok(file)
}

fn parse_document(path: &Path, raw: &str) -> Result<CheckpointDocument, CheckpointError> {
    if raw.trim().is_empty() {
        return Ok(CheckpointDocument::new());
    }
    serde_json::from_str(raw).map_err(|source| CheckpointError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn read_document(path: &Path) -> Result<CheckpointDocument, CheckpointError> {
    match std::fs::read_to_string(path) {
        Ok(raw) => parse_document(path, &raw),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(CheckpointDocument::new()),
        Err(source) => Err(io_error(path, source)),
    }
}

fn write_document(path: &Path, document: &CheckpointDocument) -> Result<(), CheckpointError> {
    let rendered = serde_json::to_vec_pretty(document).map_err(|source| {
        CheckpointError::Corrupt {
            path: path.to_path_buf(),
            source,
        }
    })?;

    // An unpersisted temp file is removed when dropped.
    let write = || -> std::io::Result<NamedTempFile> {
        let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
        tmp.write_all(&rendered)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        Ok(tmp)
    };
    let tmp = write().map_err(|source| io_error(path, source))?;
    tmp.persist(path)
        .map_err(|err| io_error(path, err.error))?;
    Ok(())
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(cursor: &str, value: &str) -> Result<DateTime<Utc>, CheckpointError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| CheckpointError::InvalidTimestamp {
            cursor: cursor.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn missing_file_reads_as_first_run() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("none.json"));
        assert!(store.get(SCHEDULED_CURSOR).await.unwrap().is_none());
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_then_get_roundtrips_and_creates_parents() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("a/b/checkpoints.json"));
        store.set(MANUAL_CURSOR, at(12)).await.unwrap();
        assert_eq!(store.get(MANUAL_CURSOR).await.unwrap(), Some(at(12)));
        assert!(store.get(SCHEDULED_CURSOR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_preserves_other_cursors() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.set(SCHEDULED_CURSOR, at(10)).await.unwrap();
        store.set(MANUAL_CURSOR, at(12)).await.unwrap();

        let doc = store.load_all().await.unwrap();
        assert_eq!(doc.len(), 2);
        assert_eq!(store.get(SCHEDULED_CURSOR).await.unwrap(), Some(at(10)));
    }

    #[tokio::test]
    async fn persisted_format_is_flat_iso_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        let store = CheckpointStore::new(&path);
        store.set(SCHEDULED_CURSOR, at(10)).await.unwrap();
        store.reset(MANUAL_CURSOR).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["scheduled"], "2024-01-10T00:00:00.000Z");
        assert!(value["manual"].is_null());

        let mut leftovers: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        leftovers.sort();
        assert_eq!(leftovers, vec!["cp.json", "cp.json.lock"]);
    }

    #[tokio::test]
    async fn reads_externally_written_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(
            &path,
            r#"{"scheduled": "2024-01-10T00:00:00Z", "manual": null}"#,
        )
        .unwrap();
        let store = CheckpointStore::new(&path);
        assert_eq!(store.get(SCHEDULED_CURSOR).await.unwrap(), Some(at(10)));
        assert!(store.get(MANUAL_CURSOR).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn advance_never_regresses() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        assert_eq!(store.advance(SCHEDULED_CURSOR, at(10)).await.unwrap(), at(10));
        assert_eq!(store.advance(SCHEDULED_CURSOR, at(5)).await.unwrap(), at(10));
        assert_eq!(store.get(SCHEDULED_CURSOR).await.unwrap(), Some(at(10)));
        assert_eq!(store.advance(SCHEDULED_CURSOR, at(20)).await.unwrap(), at(20));
        assert_eq!(store.get(SCHEDULED_CURSOR).await.unwrap(), Some(at(20)));
    }

    #[tokio::test]
    async fn reset_clears_cursor() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        store.set(MANUAL_CURSOR, at(3)).await.unwrap();
        assert!(store.reset(MANUAL_CURSOR).await.unwrap());
        assert!(store.get(MANUAL_CURSOR).await.unwrap().is_none());
        assert!(!store.reset(MANUAL_CURSOR).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_document_is_an_error_not_a_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = CheckpointStore::new(&path);
        assert!(matches!(
            store.get(SCHEDULED_CURSOR).await,
            Err(CheckpointError::Corrupt { .. })
        ));
        // A failed read must not clobber the file on the next write attempt.
        assert!(store.set(SCHEDULED_CURSOR, at(1)).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn invalid_timestamp_value_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, r#"{"scheduled": "yesterday"}"#).unwrap();
        let store = CheckpointStore::new(&path);
        assert!(matches!(
            store.get(SCHEDULED_CURSOR).await,
            Err(CheckpointError::InvalidTimestamp { .. })
        ));
    }

    #[tokio::test]
    async fn blank_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, "  \n").unwrap();
        let store = CheckpointStore::new(&path);
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writers_on_different_cursors_keep_both() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::new(dir.path().join("cp.json"));
        let other = store.clone();
        let (a, b) = tokio::join!(
            store.advance(SCHEDULED_CURSOR, at(4)),
            other.advance(MANUAL_CURSOR, at(5))
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(store.get(SCHEDULED_CURSOR).await.unwrap(), Some(at(4)));
        assert_eq!(store.get(MANUAL_CURSOR).await.unwrap(), Some(at(5)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn independent_stores_on_one_file_keep_both_updates() {
        for round in 0..50u32 {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("cp.json");
            // Separate instances share no in-memory state, like two processes.
            let scheduled = CheckpointStore::new(&path);
            let manual = CheckpointStore::new(&path);

            let (a, b) = tokio::join!(
                tokio::spawn(async move { scheduled.advance(SCHEDULED_CURSOR, at(4)).await }),
                tokio::spawn(async move { manual.advance(MANUAL_CURSOR, at(5)).await })
            );
            assert_eq!(a.unwrap().unwrap(), at(4), "round {round}");
            assert_eq!(b.unwrap().unwrap(), at(5), "round {round}");

            let reader = CheckpointStore::new(&path);
            assert_eq!(reader.get(SCHEDULED_CURSOR).await.unwrap(), Some(at(4)), "round {round}");
            assert_eq!(reader.get(MANUAL_CURSOR).await.unwrap(), Some(at(5)), "round {round}");
        }
    }

    #[test]
    fn run_claim_excludes_other_store_instances_until_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/cp.json");
        let first = CheckpointStore::new(&path);
        let second = CheckpointStore::new(&path);

        let claim = first.try_claim(SCHEDULED_CURSOR).unwrap();
        assert!(claim.is_some());
        assert!(second.try_claim(SCHEDULED_CURSOR).unwrap().is_none());
        // Other keys are independent.
        assert!(second.try_claim(MANUAL_CURSOR).unwrap().is_some());

        drop(claim);
        assert!(second.try_claim(SCHEDULED_CURSOR).unwrap().is_some());
    }
}
