//! File-backed document store: whole-document load and atomic replace.
//!
//! `load` never fails: an absent or unreadable document is substituted with a
//! fresh bootstrap, and the next successful `save` replaces whatever was on
//! disk. `save` writes a sibling temp file, syncs it, then renames it over the
//! target, so a concurrent reader sees either the previous or the new document
//! in full.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

use crate::core::errors::{Result, TelemetryError};
use crate::model::document::TelemetryDocument;

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where a loaded document came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// Parsed from the persisted file.
    Persisted,
    /// No file yet; bootstrapped.
    Missing,
    /// File present but unreadable or unparseable; bootstrapped.
    Recovered {
        /// Read or parse failure that triggered the substitution.
        details: String,
    },
}

/// A document plus its provenance.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// The document, always well-formed.
    pub document: TelemetryDocument,
    /// How it was obtained.
    pub source: LoadSource,
}

/// Single-document store rooted at a fixed path.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    /// Store backed by the document at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the persisted document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current document, bootstrapping on absence or corruption.
    #[must_use]
    pub fn load(&self) -> TelemetryDocument {
        self.load_with_source().document
    }

    /// Like [`load`](Self::load), also reporting whether recovery happened.
    #[must_use]
    pub fn load_with_source(&self) -> LoadedDocument {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return LoadedDocument {
                    document: TelemetryDocument::bootstrap(Utc::now()),
                    source: LoadSource::Missing,
                };
            }
            Err(error) => {
                return LoadedDocument {
                    document: TelemetryDocument::bootstrap(Utc::now()),
                    source: LoadSource::Recovered {
                        details: format!("read failed: {error}"),
                    },
                };
            }
        };

        match serde_json::from_str::<TelemetryDocument>(&raw) {
            Ok(document) => LoadedDocument {
                document,
                source: LoadSource::Persisted,
            },
            Err(error) => LoadedDocument {
                document: TelemetryDocument::bootstrap(Utc::now()),
                source: LoadSource::Recovered {
                    details: format!("parse failed: {error}"),
                },
            },
        }
    }

    /// Replace the persisted document atomically (write temp, fsync, rename).
    pub fn save(&self, document: &TelemetryDocument) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| TelemetryError::io(parent, source))?;
        }

        let json = serde_json::to_vec_pretty(document)?;
        let tmp_path = self.tmp_path();

        let result = (|| {
            {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&tmp_path)?;
                file.write_all(&json)?;
                file.sync_all()?;
            }
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(source) = result {
            let _ = fs::remove_file(&tmp_path);
            return Err(TelemetryError::io(&self.path, source));
        }
        Ok(())
    }

    /// Per-process, per-call temp name next to the target so the final rename
    /// stays on one filesystem and concurrent writers never share a temp file.
    fn tmp_path(&self) -> PathBuf {
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}.{seq}.tmp", std::process::id()));
        PathBuf::from(name)
    }
}
