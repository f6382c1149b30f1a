//! Bulk import of `.eml` / `.mbox` files into a user's Maildir.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::ImportError;

/// Default Maildir root when `--maildir` is not given.
pub const DEFAULT_MAILDIR_ROOT: &str = "/var/mail";

/// Counts reported by an import run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
}

/// Writes messages into `<root>/<user>/Maildir`.
pub struct MaildirImporter {
    maildir: PathBuf,
    /// Per-run delivery counter, part of every file name.
    sequence: AtomicU64,
}

impl MaildirImporter {
    pub fn new(root: impl AsRef<Path>, user: &str) -> Self {
        Self {
            maildir: root.as_ref().join(user).join("Maildir"),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn maildir(&self) -> &Path {
        &self.maildir
    }

    /// Import an `.eml` file, an `.mbox` file or a directory of `.eml` files.
    pub fn import(&self, source: &Path) -> Result<ImportReport, ImportError> {
        if !source.exists() {
            return Err(ImportError::SourceNotFound(source.to_path_buf()));
        }
        self.ensure_layout()?;

        let report = if source.is_dir() {
            self.import_dir(source)?
        } else {
            match extension(source).as_deref() {
                Some("eml") => {
                    let data = fs::read(source)?;
                    self.write_message(&data)?;
                    ImportReport {
                        imported: 1,
                        failed: 0,
                    }
                }
                Some("mbox") => self.import_mbox(source)?,
                _ => {
                    return Err(ImportError::UnsupportedFormat(
                        source.display().to_string(),
                    ));
                }
            }
        };

        info!(
            source = %source.display(),
            maildir = %self.maildir.display(),
            imported = report.imported,
            failed = report.failed,
            "Import finished"
        );
        Ok(report)
    }

    fn import_dir(&self, dir: &Path) -> Result<ImportReport, ImportError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && extension(p).as_deref() == Some("eml"))
            .collect();
        paths.sort();

        let mut report = ImportReport::default();
        for path in paths {
            match fs::read(&path).map_err(ImportError::from).and_then(|data| {
                self.write_message(&data)?;
                Ok(())
            }) {
                Ok(()) => report.imported += 1,
                Err(e) => {
                    warn!(file = %path.display(), "Skipping message: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn import_mbox(&self, path: &Path) -> Result<ImportReport, ImportError> {
        let data = fs::read(path)?;
        let mut report = ImportReport::default();
        for (index, message) in split_mbox(&data).into_iter().enumerate() {
            match self.write_message(&message) {
                Ok(_) => report.imported += 1,
                Err(e) => {
                    warn!(file = %path.display(), index, "Skipping message: {e}");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    fn ensure_layout(&self) -> Result<(), ImportError> {
        for sub in ["new", "cur", "tmp"] {
            fs::create_dir_all(self.maildir.join(sub))?;
        }
        Ok(())
    }

    /// Write through `tmp/` and rename into `cur/` marked as seen.
    fn write_message(&self, data: &[u8]) -> Result<PathBuf, ImportError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let name = message_file_name(data, Utc::now().timestamp(), sequence);
        let tmp_path = self.maildir.join("tmp").join(&name);
        let final_path = self.maildir.join("cur").join(format!("{name}:2,S"));

        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(final_path)
    }
}

/// `<unix-ts>.P<pid>Q<seq>.<first 8 hex of sha256>`
///
/// Pid and sequence keep names unique within a second, identical content
/// included.
fn message_file_name(data: &[u8], timestamp: i64, sequence: u64) -> String {
    let digest = Sha256::digest(data);
    let hash: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    format!("{timestamp}.P{}Q{sequence}.{hash}", std::process::id())
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Split an mbox file into messages.
///
/// Lines starting with `From ` separate messages and are dropped; one level
/// of `>From ` quoting is undone. Empty messages are discarded.
pub fn split_mbox(data: &[u8]) -> Vec<Vec<u8>> {
    let mut messages = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut started = false;

    for line in data.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b"From ") {
            if started {
                push_message(&mut messages, std::mem::take(&mut current));
            }
            started = true;
            continue;
        }
        started = true;
        if line.starts_with(b">From ") {
            current.extend_from_slice(&line[1..]);
        } else {
            current.extend_from_slice(line);
        }
    }
    push_message(&mut messages, current);
    messages
}

fn push_message(messages: &mut Vec<Vec<u8>>, mut message: Vec<u8>) {
    // The blank line before the next separator belongs to the mbox framing.
    if message.ends_with(b"\r\n\r\n") {
        message.truncate(message.len() - 2);
    } else if message.ends_with(b"\n\n") {
        message.truncate(message.len() - 1);
    }
    if message.iter().any(|b| !b.is_ascii_whitespace()) {
        messages.push(message);
    }
}
