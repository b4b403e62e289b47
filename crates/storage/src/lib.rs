use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use trawl_core::{CrawlError, CrawlStats, UrlEntry};

/// A complete crawl snapshot: everything needed to resume where a crawl
/// left off. `visited` and `pending` together describe the whole crawl
/// graph at the snapshot instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    pub start_url: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stats: CrawlStats,
    pub visited: Vec<String>,
    pub pending: Vec<UrlEntry>,
}

/// JSON snapshot store with atomic writes: the document goes to
/// `<path>.tmp` first and is renamed over `<path>`.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, state: &CrawlState) -> Result<(), CrawlError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| CrawlError::StateIo(format!("serialize state: {e}")))?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)
                    .map_err(|e| CrawlError::StateIo(format!("{}: {e}", dir.display())))?;
            }
        }

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, &bytes)
            .map_err(|e| CrawlError::StateIo(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| CrawlError::StateIo(format!("{}: {e}", self.path.display())))?;

        debug!(
            path = %self.path.display(),
            visited = state.visited.len(),
            pending = state.pending.len(),
            "crawl state written"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<Option<CrawlState>, CrawlError> {
        state_info(&self.path)
    }
}

/// Read a snapshot if one exists. A missing file is `Ok(None)`, not an
/// error; anything unreadable or undecodable is `StateIo`.
pub fn state_info(path: impl AsRef<Path>) -> Result<Option<CrawlState>, CrawlError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let bytes =
        fs::read(path).map_err(|e| CrawlError::StateIo(format!("{}: {e}", path.display())))?;
    let state = serde_json::from_slice(&bytes)
        .map_err(|e| CrawlError::StateIo(format!("{}: {e}", path.display())))?;
    Ok(Some(state))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os: OsString = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> CrawlState {
        CrawlState {
            start_url: "https://example.com/".to_string(),
            started_at: Utc::now(),
            updated_at: Utc::now(),
            stats: CrawlStats {
                pages_success: 3,
                pages_failed: 1,
                pages_skipped: 2,
                bytes_fetched: 4096,
                elapsed_ms: 1500,
                pages_per_second: 2.0,
            },
            visited: vec![
                "https://example.com/".to_string(),
                "https://example.com/a".to_string(),
            ],
            pending: vec![UrlEntry {
                url: "https://example.com/a".to_string(),
                depth: 1,
                priority: 1,
            }],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let state = sample_state();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.start_url, state.start_url);
        assert_eq!(loaded.stats, state.stats);
        assert_eq!(loaded.visited, state.visited);
        assert_eq!(loaded.pending, state.pending);
    }

    #[test]
    fn missing_file_is_absent_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nope.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_leaves_no_tmp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path);
        store.save(&sample_state()).unwrap();
        assert!(path.exists());
        assert!(!tmp_path(&path).exists());
    }

    #[test]
    fn corrupt_file_is_a_state_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(state_info(&path), Err(CrawlError::StateIo(_))));
    }
}
