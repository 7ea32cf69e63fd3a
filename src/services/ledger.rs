use crate::domain::constants::{
    HASH_PREFIX_LEN, LEDGER_LOCK_REL_PATH, LEDGER_REL_PATH, LOCAL_TS_FORMAT,
};
use crate::domain::models::{LedgerRecord, LedgerResult};
use anyhow::Context;
use fs2::FileExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const LOCK_ATTEMPTS: u32 = 10;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Durable record of bypass events, a JSON array under the VCS metadata
/// directory. Only the bypass resolver writes it.
///
/// Two invocations may race, so every read-modify-write runs under an
/// exclusive advisory lock on a sibling lock file (the data file itself is
/// replaced by rename, which would detach a lock held on it), and the data
/// file is replaced atomically via a temp sibling.
pub struct LedgerStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Ledger contents plus whether the file could actually be trusted.
/// A missing file is simply empty; an unparseable one is empty but tainted,
/// which makes one-time tokens unverifiable (and therefore refused).
pub struct LedgerSnapshot {
    pub records: Vec<LedgerRecord>,
    pub readable: bool,
}

/// An in-flight read-modify-write. Appends are committed by
/// [`LedgerStore::with_lock`] after the closure returns.
pub struct LedgerTxn {
    pub records: Vec<LedgerRecord>,
    pub readable: bool,
    appended: usize,
}

impl LedgerTxn {
    /// Whether a one-time use of this hash was already recorded for the
    /// scope. Reusable-token events are recorded too but never block.
    pub fn has_consumed(&self, scope: &str, hash_prefix: &str) -> bool {
        self.records.iter().any(|r| {
            r.scope == scope
                && r.hash_prefix == hash_prefix
                && r.result == LedgerResult::Consumed
                && !r.reusable
        })
    }

    pub fn append(&mut self, record: LedgerRecord) {
        self.records.push(record);
        self.appended += 1;
    }
}

impl LedgerStore {
    pub fn new(repo_root: &Path) -> Self {
        Self {
            path: repo_root.join(LEDGER_REL_PATH),
            lock_path: repo_root.join(LEDGER_LOCK_REL_PATH),
        }
    }

    /// Lock-free read for inspection commands.
    pub fn snapshot(&self) -> LedgerSnapshot {
        read_records(&self.path)
    }

    /// Run a read-modify-write cycle under the advisory lock. The snapshot
    /// is taken after the lock is held, so a concurrent consumption cannot
    /// be missed. Appended records are persisted atomically before this
    /// returns; any failure (lock, serialize, rename) surfaces as `Err` and
    /// the caller must treat it as a denial.
    pub fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut LedgerTxn) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .with_context(|| format!("opening ledger lock {}", self.lock_path.display()))?;
        acquire_with_retries(&lock_file)
            .with_context(|| format!("locking ledger {}", self.lock_path.display()))?;

        let result = (|| {
            let snapshot = read_records(&self.path);
            let mut txn = LedgerTxn {
                records: snapshot.records,
                readable: snapshot.readable,
                appended: 0,
            };
            let out = f(&mut txn)?;
            if txn.appended > 0 {
                self.replace(&txn.records)?;
            }
            Ok(out)
        })();

        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    /// Write-temp-sibling, fsync, rename. Readers see the old or the new
    /// array, never a torn write.
    fn replace(&self, records: &[LedgerRecord]) -> anyhow::Result<()> {
        let parent = self
            .path
            .parent()
            .context("ledger path has no parent directory")?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("creating ledger temp file")?;
        serde_json::to_writer_pretty(&mut tmp, records).context("serializing ledger")?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all().context("syncing ledger temp file")?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

fn acquire_with_retries(file: &std::fs::File) -> anyhow::Result<()> {
    let mut attempt = 0;
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                if attempt >= LOCK_ATTEMPTS {
                    return Err(e.into());
                }
                std::thread::sleep(LOCK_RETRY_DELAY);
            }
        }
    }
}

fn read_records(path: &Path) -> LedgerSnapshot {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return LedgerSnapshot {
                records: Vec::new(),
                readable: true,
            }
        }
        Err(_) => {
            return LedgerSnapshot {
                records: Vec::new(),
                readable: false,
            }
        }
    };
    match serde_json::from_str::<Vec<LedgerRecord>>(&raw) {
        Ok(records) => LedgerSnapshot {
            records,
            readable: true,
        },
        Err(_) => LedgerSnapshot {
            records: Vec::new(),
            readable: false,
        },
    }
}

/// Audit-grade identifier for a token hash: enough to match within one
/// policy's token set, not enough to replay.
pub fn hash_prefix(sha256_hex: &str) -> String {
    sha256_hex.chars().take(HASH_PREFIX_LEN).collect()
}

pub fn now_ts() -> String {
    chrono::Local::now().format(LOCAL_TS_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, LedgerStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        let store = LedgerStore::new(tmp.path());
        (tmp, store)
    }

    fn record(scope: &str, prefix: &str, reusable: bool, result: LedgerResult) -> LedgerRecord {
        LedgerRecord {
            ts: "2026-06-15 12:00:00".to_string(),
            user: "Alice".to_string(),
            scope: scope.to_string(),
            label: "t1".to_string(),
            hash_prefix: prefix.to_string(),
            reusable,
            reason: "urgent".to_string(),
            files: vec!["design/keep.sv".to_string()],
            result,
        }
    }

    #[test]
    fn missing_file_reads_as_clean_empty() {
        let (_tmp, store) = store();
        let snap = store.snapshot();
        assert!(snap.records.is_empty());
        assert!(snap.readable);
    }

    #[test]
    fn corrupt_file_reads_as_tainted_empty() {
        let (tmp, store) = store();
        let path = tmp.path().join(LEDGER_REL_PATH);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{definitely not an array").unwrap();
        let snap = store.snapshot();
        assert!(snap.records.is_empty());
        assert!(!snap.readable);
    }

    #[test]
    fn append_round_trips() {
        let (_tmp, store) = store();
        store
            .with_lock(|txn| {
                txn.append(record("emergency", "aa00aa00aa00", false, LedgerResult::Consumed));
                Ok(())
            })
            .expect("write succeeds");

        let snap = store.snapshot();
        assert!(snap.readable);
        assert_eq!(snap.records.len(), 1);
        assert_eq!(snap.records[0].scope, "emergency");
        assert_eq!(snap.records[0].hash_prefix, "aa00aa00aa00");
        assert_eq!(snap.records[0].result, LedgerResult::Consumed);
    }

    #[test]
    fn records_are_appended_never_replaced() {
        let (_tmp, store) = store();
        for i in 0..3 {
            store
                .with_lock(|txn| {
                    txn.append(record(
                        "freeze",
                        &format!("prefix{:02}cafe", i),
                        false,
                        LedgerResult::Consumed,
                    ));
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(store.snapshot().records.len(), 3);
    }

    #[test]
    fn consumed_one_time_hash_is_observed_per_scope() {
        let (_tmp, store) = store();
        store
            .with_lock(|txn| {
                txn.append(record("emergency", "deadbeef0000", false, LedgerResult::Consumed));
                Ok(())
            })
            .unwrap();

        store
            .with_lock(|txn| {
                assert!(txn.has_consumed("emergency", "deadbeef0000"));
                assert!(!txn.has_consumed("freeze", "deadbeef0000"));
                assert!(!txn.has_consumed("emergency", "deadbeef9999"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn reusable_and_denied_records_do_not_count_as_consumption() {
        let (_tmp, store) = store();
        store
            .with_lock(|txn| {
                txn.append(record("emergency", "cafecafe0000", true, LedgerResult::Consumed));
                txn.append(record(
                    "emergency",
                    "cafecafe1111",
                    false,
                    LedgerResult::ReplayedDenied,
                ));
                Ok(())
            })
            .unwrap();

        store
            .with_lock(|txn| {
                assert!(!txn.has_consumed("emergency", "cafecafe0000"));
                assert!(!txn.has_consumed("emergency", "cafecafe1111"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn closure_error_leaves_file_untouched() {
        let (_tmp, store) = store();
        let result: anyhow::Result<()> = store.with_lock(|txn| {
            txn.append(record("freeze", "aaaaaaaaaaaa", false, LedgerResult::Consumed));
            anyhow::bail!("caller decided to abort")
        });
        assert!(result.is_err());
        assert!(store.snapshot().records.is_empty());
    }

    #[test]
    fn hash_prefix_is_twelve_chars() {
        let full = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(hash_prefix(full), "0123456789ab");
    }
}
