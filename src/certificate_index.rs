use crate::normalization::NameNormalizer;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File-name convention shared with the certificate renderer:
/// `<prefix><normalized identity>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateNaming {
    pub prefix: String,
    pub extension: String,
}

impl Default for CertificateNaming {
    fn default() -> Self {
        Self {
            prefix: "certificado_".to_string(),
            extension: "pdf".to_string(),
        }
    }
}

impl CertificateNaming {
    /// Identity key encoded in `file_name`, or `None` if the name does not
    /// follow the convention.
    pub fn identity_of(&self, file_name: &str) -> Option<String> {
        let (stem, extension) = file_name.rsplit_once('.')?;
        if !extension.eq_ignore_ascii_case(&self.extension) {
            return None;
        }
        // Prefix and extension are both matched case-insensitively.
        let head = stem.get(..self.prefix.len())?;
        if head.to_lowercase() != self.prefix.to_lowercase() {
            return None;
        }
        Some(NameNormalizer::normalize(&stem[self.prefix.len()..]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRecord {
    pub identity: String,
    pub path: PathBuf,
}

/// Result of resolving an identity against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Exact(PathBuf),
    /// Substring fallback: one key contains the other.
    Approximate(PathBuf),
    /// Several substring candidates and strict matching is on.
    Ambiguous(Vec<PathBuf>),
    NotFound,
}

impl Lookup {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Lookup::Exact(path) | Lookup::Approximate(path) => Some(path.as_path()),
            Lookup::Ambiguous(_) | Lookup::NotFound => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("cannot read certificate directory {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Snapshot of the certificate directory, built once per run.
///
/// The directory stays the source of truth: files added after `build` are
/// not seen until the next build.
#[derive(Debug, Default)]
pub struct CertificateIndex {
    // Sorted by file name; this order breaks substring ties.
    records: Vec<CertificateRecord>,
    by_identity: HashMap<String, usize>,
    strict_matching: bool,
}

impl CertificateIndex {
    pub fn build(dir: &Path, naming: &CertificateNaming) -> Result<Self, IndexError> {
        let io_err = |source| IndexError::Io {
            path: dir.to_path_buf(),
            source,
        };

        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            if !entry.file_type().map_err(io_err)?.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => files.push(name),
                Err(name) => log::warn!("Skipping non UTF-8 file name: {name:?}"),
            }
        }
        files.sort();

        let mut index = Self::default();
        for file_name in files {
            let Some(identity) = naming.identity_of(&file_name) else {
                log::debug!("Ignoring {file_name}: not a certificate file");
                continue;
            };
            if identity.is_empty() {
                log::warn!("Ignoring {file_name}: empty identity would match every name");
                continue;
            }
            index.insert(CertificateRecord {
                identity,
                path: dir.join(&file_name),
            });
        }

        log::info!(
            "Indexed {} certificates in {}",
            index.records.len(),
            dir.display()
        );
        Ok(index)
    }

    pub fn with_strict_matching(mut self, strict: bool) -> Self {
        self.strict_matching = strict;
        self
    }

    fn insert(&mut self, record: CertificateRecord) {
        if let Some(&slot) = self.by_identity.get(&record.identity) {
            log::warn!(
                "Duplicate certificate for '{}': {} replaces {}",
                record.identity,
                record.path.display(),
                self.records[slot].path.display()
            );
            self.records[slot] = record;
            return;
        }
        self.by_identity
            .insert(record.identity.clone(), self.records.len());
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[CertificateRecord] {
        &self.records
    }

    /// Resolve a display name to a certificate.
    ///
    /// Exact key match first. Otherwise the first record, in file-name
    /// order, whose key contains the query or is contained by it. This
    /// fallback is a heuristic: "ana" matches every "ana ..." file. With
    /// strict matching, more than one candidate yields `Ambiguous`.
    pub fn find(&self, name: &str) -> Lookup {
        let key = NameNormalizer::normalize(name);
        if let Some(&slot) = self.by_identity.get(&key) {
            return Lookup::Exact(self.records[slot].path.clone());
        }
        if key.is_empty() {
            return Lookup::NotFound;
        }

        let candidates: Vec<&CertificateRecord> = self
            .records
            .iter()
            .filter(|record| record.identity.contains(&key) || key.contains(&record.identity))
            .collect();

        match candidates.as_slice() {
            [] => Lookup::NotFound,
            [only] => Lookup::Approximate(only.path.clone()),
            [first, rest @ ..] => {
                if self.strict_matching {
                    log::warn!(
                        "'{key}' matches {} certificates, rejecting as ambiguous",
                        candidates.len()
                    );
                    return Lookup::Ambiguous(
                        candidates.iter().map(|record| record.path.clone()).collect(),
                    );
                }
                log::warn!(
                    "'{key}' matches {} certificates, using {} (also: {})",
                    candidates.len(),
                    first.path.display(),
                    rest.iter()
                        .map(|record| record.identity.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                Lookup::Approximate(first.path.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn certificate_dir(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            fs::write(dir.path().join(file), b"%PDF-1.4").unwrap();
        }
        dir
    }

    fn build(dir: &TempDir) -> CertificateIndex {
        CertificateIndex::build(dir.path(), &CertificateNaming::default()).unwrap()
    }

    #[test]
    fn test_identity_of() {
        let naming = CertificateNaming::default();
        assert_eq!(
            naming.identity_of("certificado_José Pérez.pdf"),
            Some("jose perez".to_string())
        );
        assert_eq!(
            naming.identity_of("certificado_ana.PDF"),
            Some("ana".to_string())
        );
        assert_eq!(naming.identity_of("certificado_ana.png"), None);
        assert_eq!(naming.identity_of("diploma_ana.pdf"), None);
        assert_eq!(naming.identity_of("certificado_ana"), None);
    }

    #[test]
    fn test_prefix_case_is_ignored() {
        let naming = CertificateNaming::default();
        assert_eq!(
            naming.identity_of("Certificado_Ana Gómez.pdf"),
            Some("ana gomez".to_string())
        );
        assert_eq!(
            naming.identity_of("CERTIFICADO_LUIS.PDF"),
            Some("luis".to_string())
        );
        assert_eq!(naming.identity_of("Certificad.pdf"), None);

        let dir = certificate_dir(&["Certificado_Ana.pdf"]);
        assert!(matches!(build(&dir).find("Ana"), Lookup::Exact(_)));
    }

    #[test]
    fn test_exact_match_after_normalization() {
        let dir = certificate_dir(&["certificado_jose perez.pdf", "certificado_ana gomez.pdf"]);
        let index = build(&dir);

        assert_eq!(index.len(), 2);
        assert_eq!(
            index.find("José Pérez"),
            Lookup::Exact(dir.path().join("certificado_jose perez.pdf"))
        );
    }

    #[test]
    fn test_truncated_name_resolves_by_substring() {
        let dir = certificate_dir(&["certificado_ana maria gomez.pdf"]);
        let index = build(&dir);

        // Approximate match: the file holds a shortened form of the name.
        assert_eq!(
            index.find("Ana María Gómez López"),
            Lookup::Approximate(dir.path().join("certificado_ana maria gomez.pdf"))
        );
    }

    #[test]
    fn test_short_query_matches_longer_file_name() {
        let dir = certificate_dir(&["certificado_carlos ruiz diaz.pdf"]);
        let index = build(&dir);

        assert_eq!(
            index.find("Carlos Ruiz"),
            Lookup::Approximate(dir.path().join("certificado_carlos ruiz diaz.pdf"))
        );
    }

    #[test]
    fn test_not_found_is_a_value() {
        let dir = certificate_dir(&["certificado_jose perez.pdf"]);
        let index = build(&dir);

        assert_eq!(index.find("Laura Fernández"), Lookup::NotFound);
        assert_eq!(index.find("   "), Lookup::NotFound);
        assert!(index.find("Laura").path().is_none());
    }

    #[test]
    fn test_ambiguous_fallback_picks_first_in_file_name_order() {
        let dir = certificate_dir(&[
            "certificado_ana torres.pdf",
            "certificado_ana perez.pdf",
            "certificado_ana diaz.pdf",
        ]);
        let index = build(&dir);

        let first = index.find("Ana");
        assert_eq!(
            first,
            Lookup::Approximate(dir.path().join("certificado_ana diaz.pdf"))
        );
        // Deterministic across repeated calls.
        for _ in 0..5 {
            assert_eq!(index.find("Ana"), first);
        }
    }

    #[test]
    fn test_strict_matching_rejects_multiple_candidates() {
        let dir = certificate_dir(&["certificado_ana torres.pdf", "certificado_ana perez.pdf"]);
        let index = build(&dir).with_strict_matching(true);

        match index.find("Ana") {
            Lookup::Ambiguous(paths) => assert_eq!(paths.len(), 2),
            other => panic!("expected ambiguous lookup, got {other:?}"),
        }
        // A single candidate is still accepted.
        assert_eq!(
            index.find("Ana Torres Vega"),
            Lookup::Approximate(dir.path().join("certificado_ana torres.pdf"))
        );
    }

    #[test]
    fn test_duplicate_keys_last_writer_wins() {
        // Both normalize to "jose perez"; the later file name wins.
        let dir = certificate_dir(&["certificado_JOSE PEREZ.pdf", "certificado_josé pérez.pdf"]);
        let index = build(&dir);

        assert_eq!(index.len(), 1);
        assert_eq!(
            index.find("jose perez"),
            Lookup::Exact(dir.path().join("certificado_josé pérez.pdf"))
        );
    }

    #[test]
    fn test_ignores_foreign_and_empty_files() {
        let dir = certificate_dir(&[
            "certificado_.pdf",
            "notes.txt",
            "certificado_ana.png",
            "certificado_ana.pdf",
        ]);
        fs::create_dir(dir.path().join("certificado_subdir.pdf")).unwrap();
        let index = build(&dir);

        assert_eq!(index.len(), 1);
        assert_eq!(index.records()[0].identity, "ana");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            CertificateIndex::build(&missing, &CertificateNaming::default()),
            Err(IndexError::Io { .. })
        ));
    }
}
