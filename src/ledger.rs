use crate::campaign::{CampaignKey, KEY_SEPARATOR};
use crate::normalization::NameNormalizer;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("cannot read ledger {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("ledger {} is not a JSON list of strings: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot write ledger {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Durable record of campaign keys that were already delivered.
///
/// Stored as a pretty-printed JSON array of strings, either plain identities
/// or `identity:title` composites. The file only ever grows and is rewritten
/// in full through a temporary file on every append.
#[derive(Debug)]
pub struct SentLedger {
    path: PathBuf,
    entries: Vec<String>,
}

impl SentLedger {
    /// Load the ledger at `path`. A missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let entries = match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).map_err(|source| LedgerError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No ledger at {}, starting empty", path.display());
                Vec::new()
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` was already delivered.
    ///
    /// Entries may have been written in a slightly different form than the
    /// current key, so both sides are normalized and compared in two passes:
    /// exact match against `identity:title` or the bare identity, then, for
    /// composite entries only, independent bidirectional containment of the
    /// identity part and the title part.
    pub fn contains(&self, key: &CampaignKey) -> bool {
        let full = key.to_string();
        let identity = key.identity();
        let title = key.title().unwrap_or_default();

        let normalized: Vec<String> = self
            .entries
            .iter()
            .map(|entry| NameNormalizer::normalize(entry))
            .collect();

        if normalized
            .iter()
            .any(|entry| *entry == full || entry == identity)
        {
            return true;
        }

        normalized.iter().any(|entry| {
            let Some((entry_identity, entry_title)) = entry.split_once(KEY_SEPARATOR) else {
                return false;
            };
            // An empty identity part would contain-match every name.
            !entry_identity.is_empty()
                && contains_either_way(entry_identity, identity)
                && contains_either_way(entry_title, title)
        })
    }

    /// Record a delivered key and persist the whole ledger before returning.
    pub fn append(&mut self, key: &CampaignKey) -> Result<(), LedgerError> {
        self.entries.push(key.to_string());
        if let Err(e) = self.persist() {
            self.entries.pop();
            return Err(e);
        }
        log::debug!("Ledger now holds {} entries", self.entries.len());
        Ok(())
    }

    /// Prove the ledger can be written before anything is sent: create,
    /// sync and remove the temporary file `append` goes through.
    pub fn check_writable(&self) -> Result<(), LedgerError> {
        let write_err = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };
        let tmp = self.tmp_path();
        let file = File::create(&tmp).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::remove_file(&tmp).map_err(write_err)?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    fn persist(&self) -> Result<(), LedgerError> {
        let write_err = |source| LedgerError::Write {
            path: self.path.clone(),
            source,
        };
        let content = serde_json::to_string_pretty(&self.entries)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let tmp = self.tmp_path();
        let mut file = File::create(&tmp).map_err(write_err)?;
        file.write_all(content.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

fn contains_either_way(a: &str, b: &str) -> bool {
    a.contains(b) || b.contains(a)
}
