use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{AuditErr, Result, RoniRecord};

/// Durable, append-only storage of RONI records, keyed by model version.
pub trait AuditStore: Send + Sync {
    /// Should persist `record` under `version`.
    ///
    /// # Arguments
    /// * `version` - The model version the record belongs to.
    /// * `record` - The record to persist.
    ///
    /// # Returns
    /// A `DuplicateVersion` error if there's already a record for `version`, records are
    /// never overwritten.
    fn append(&self, version: u64, record: &RoniRecord) -> Result<()>;
}

/// An in-process audit store, its records live as long as the store.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    records: Mutex<BTreeMap<u64, RoniRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, version: u64) -> Option<RoniRecord> {
        self.records.lock().get(&version).cloned()
    }

    /// Returns every record, ordered by version.
    pub fn records(&self) -> Vec<RoniRecord> {
        self.records.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AuditStore for MemoryAuditStore {
    fn append(&self, version: u64, record: &RoniRecord) -> Result<()> {
        let mut records = self.records.lock();
        if records.contains_key(&version) {
            return Err(AuditErr::DuplicateVersion(version));
        }

        records.insert(version, record.clone());
        Ok(())
    }
}

/// A single line of a json lines audit file.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord<R> {
    version: u64,
    record: R,
}

#[derive(Debug)]
struct JsonLinesInner {
    file: File,
    versions: BTreeSet<u64>,
}

/// An audit store writing one json document per line to a file.
///
/// Every append is flushed to disk before returning. The versions already in the file are
/// loaded on open, so duplicates are refused across restarts. An unterminated last line is a
/// write that never completed, it's dropped on open.
#[derive(Debug)]
pub struct JsonLinesAuditStore {
    path: PathBuf,
    inner: Mutex<JsonLinesInner>,
}

impl JsonLinesAuditStore {
    /// Opens the audit file at `path`, creating it if it doesn't exist.
    ///
    /// # Arguments
    /// * `path` - The location of the audit file.
    ///
    /// # Returns
    /// The store, or an error if the file can't be opened or its content isn't valid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let (records, valid) = Self::parse(&content)?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if valid < content.len() {
            warn!(
                bytes = content.len() - valid;
                "dropping a torn record at the end of {}",
                path.display()
            );
            file.set_len(valid as u64)?;
        }
        if !content[..valid].is_empty() && !content[..valid].ends_with('\n') {
            file.write_all(b"\n")?;
        }

        let versions = records.into_keys().collect();

        Ok(Self {
            path,
            inner: Mutex::new(JsonLinesInner { file, versions }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record stored in an audit file.
    ///
    /// # Arguments
    /// * `path` - The location of the audit file.
    ///
    /// # Returns
    /// The records keyed by model version.
    pub fn read_records<P: AsRef<Path>>(path: P) -> Result<BTreeMap<u64, RoniRecord>> {
        let content = fs::read_to_string(path)?;
        let (records, _) = Self::parse(&content)?;
        Ok(records)
    }

    /// Parses the content of an audit file.
    ///
    /// # Returns
    /// The records and the length of the content holding them, which is shorter than `content`
    /// only if the last line is torn.
    fn parse(content: &str) -> Result<(BTreeMap<u64, RoniRecord>, usize)> {
        let mut records = BTreeMap::new();
        let mut valid = 0;

        for line in content.split_inclusive('\n') {
            let terminated = line.ends_with('\n');
            let json = line.trim();

            if !json.is_empty() {
                match serde_json::from_str::<StoredRecord<RoniRecord>>(json) {
                    Ok(stored) => {
                        records.insert(stored.version, stored.record);
                    }
                    Err(_) if !terminated => break,
                    Err(e) => return Err(e.into()),
                }
            }

            valid += line.len();
        }

        Ok((records, valid))
    }
}

impl AuditStore for JsonLinesAuditStore {
    fn append(&self, version: u64, record: &RoniRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.versions.contains(&version) {
            return Err(AuditErr::DuplicateVersion(version));
        }

        let mut line = serde_json::to_vec(&StoredRecord { version, record })?;
        line.push(b'\n');

        let start = inner.file.metadata()?.len();
        let file = &mut inner.file;
        if let Err(e) = file.write_all(&line).and_then(|()| file.sync_data()) {
            // drop the partial line
            if let Err(truncate) = file.set_len(start) {
                warn!(version = version; "couldn't drop a partial audit record: {truncate}");
            }
            return Err(e.into());
        }

        inner.versions.insert(version);
        Ok(())
    }
}
