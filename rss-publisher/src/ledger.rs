use crate::types::{FeedEntry, PipelineError, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const TITLES_FILE: &str = "posted_titles.txt";
pub const HASHES_FILE: &str = "posted_hashes.txt";

/// The two identities an entry is deduplicated by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKeys {
    pub title_key: String,
    pub content_hash: String,
}

impl DedupKeys {
    pub fn from_entry(entry: &FeedEntry) -> Self {
        let title_key = normalize_title(&entry.title);
        let summary = html_escape::decode_html_entities(&entry.summary);
        Self {
            title_key,
            content_hash: hash_content(summary.trim()),
        }
    }
}

/// HTML-unescaped, trimmed, single line (the ledger is line-oriented).
pub fn normalize_title(raw: &str) -> String {
    let unescaped = html_escape::decode_html_entities(raw);
    unescaped
        .trim()
        .replace(['\r', '\n'], " ")
}

/// Lowercase hex SHA-256 of `content`.
pub fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Append-only record of published titles and content hashes.
///
/// Each recorded key is appended and synced before the call returns, so a
/// crash loses at most the entry that was in flight.
#[derive(Debug)]
pub struct DedupLedger {
    titles_path: PathBuf,
    hashes_path: PathBuf,
    titles: HashSet<String>,
    hashes: HashSet<String>,
}

impl DedupLedger {
    /// Load both sets from `state_dir`. Missing files are empty sets.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let titles_path = state_dir.join(TITLES_FILE);
        let hashes_path = state_dir.join(HASHES_FILE);
        let titles = read_lines(&titles_path)?;
        let hashes = read_lines(&hashes_path)?;

        info!(
            "Loaded dedup ledger from {} ({} titles, {} hashes)",
            state_dir.display(),
            titles.len(),
            hashes.len()
        );

        Ok(Self {
            titles_path,
            hashes_path,
            titles,
            hashes,
        })
    }

    pub fn contains_title(&self, key: &str) -> bool {
        self.titles.contains(key)
    }

    pub fn contains_hash(&self, key: &str) -> bool {
        self.hashes.contains(key)
    }

    pub fn record_title(&mut self, key: &str) -> Result<()> {
        if self.titles.contains(key) {
            return Ok(());
        }
        append_line(&self.titles_path, key)?;
        self.titles.insert(key.to_string());
        Ok(())
    }

    pub fn record_hash(&mut self, key: &str) -> Result<()> {
        if self.hashes.contains(key) {
            return Ok(());
        }
        append_line(&self.hashes_path, key)?;
        self.hashes.insert(key.to_string());
        Ok(())
    }

    pub fn titles_len(&self) -> usize {
        self.titles.len()
    }

    pub fn hashes_len(&self) -> usize {
        self.hashes.len()
    }
}

fn read_lines(path: &Path) -> Result<HashSet<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Ledger file {} not found, starting empty", path.display());
            Ok(HashSet::new())
        }
        Err(source) => Err(PipelineError::Persistence {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let persist = || -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        file.sync_data()
    };
    persist().map_err(|source| PipelineError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_files_load_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = DedupLedger::load(dir.path()).unwrap();
        assert_eq!(ledger.titles_len(), 0);
        assert_eq!(ledger.hashes_len(), 0);
    }

    #[test]
    fn recorded_keys_are_visible_and_durable() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DedupLedger::load(dir.path()).unwrap();
        ledger.record_title("Foo Launches Gadget X").unwrap();
        ledger.record_hash("abc123").unwrap();
        assert!(ledger.contains_title("Foo Launches Gadget X"));
        assert!(ledger.contains_hash("abc123"));

        let reloaded = DedupLedger::load(dir.path()).unwrap();
        assert!(reloaded.contains_title("Foo Launches Gadget X"));
        assert!(reloaded.contains_hash("abc123"));
    }

    #[test]
    fn appends_rather_than_rewrites() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(TITLES_FILE), "Existing\n\n").unwrap();
        let mut ledger = DedupLedger::load(dir.path()).unwrap();
        ledger.record_title("New").unwrap();
        ledger.record_title("New").unwrap();
        let raw = std::fs::read_to_string(dir.path().join(TITLES_FILE)).unwrap();
        assert_eq!(raw, "Existing\n\nNew\n");
    }

    #[test]
    fn unwritable_store_is_a_persistence_error() {
        let dir = TempDir::new().unwrap();
        let mut ledger = DedupLedger::load(&dir.path().join("missing-dir")).unwrap();
        let err = ledger.record_title("x").unwrap_err();
        assert!(err.is_fatal());
        assert!(!ledger.contains_title("x"));
    }

    #[test]
    fn keys_unescape_and_trim() {
        let entry = FeedEntry::new("  Bar &amp; Baz\nmerge ", " Bar &amp; Baz are merging. ", "https://x");
        let keys = DedupKeys::from_entry(&entry);
        assert_eq!(keys.title_key, "Bar & Baz merge");
        assert_eq!(keys.content_hash, hash_content("Bar & Baz are merging."));
        assert_eq!(keys.content_hash.len(), 64);
    }
}
