//! Append-only route log
//!
//! The log is the source of truth for the routing table. Every mutation is
//! written here as one line before it becomes visible in memory, and the
//! table is rebuilt at startup by replaying the lines in order.
//!
//! # Format
//!
//! ```text
//! #tolinks-log v1
//! a.com|http://10.0.0.1
//! b.com|http://10.0.0.2
//! a.com|DELETE
//! ```
//!
//! The header line is written when the log is created. Logs without a header
//! are read as version 1.

use crate::error::{Result, RouteError};
use crate::validate;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Field separator between domain name and address
pub const SEPARATOR: char = '|';

/// Address marker for a deleted domain
pub const TOMBSTONE: &str = "DELETE";

/// Lines starting with this prefix are version headers
pub const HEADER_PREFIX: &str = "#";

/// Log format version written into new logs
pub const FORMAT_VERSION: u32 = 1;

/// One entry of the route log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Route `domain` to `address`, replacing any earlier route
    Upsert { domain: String, address: String },
    /// Remove the route for `domain`
    Delete { domain: String },
}

impl Record {
    pub fn upsert(domain: impl Into<String>, address: impl Into<String>) -> Self {
        Self::Upsert {
            domain: domain.into(),
            address: address.into(),
        }
    }

    pub fn delete(domain: impl Into<String>) -> Self {
        Self::Delete {
            domain: domain.into(),
        }
    }

    pub fn domain(&self) -> &str {
        match self {
            Self::Upsert { domain, .. } | Self::Delete { domain } => domain,
        }
    }

    /// Encode as a newline-terminated log line
    pub fn encode(&self) -> String {
        match self {
            Self::Upsert { domain, address } => format!("{}{}{}\n", domain, SEPARATOR, address),
            Self::Delete { domain } => format!("{}{}{}\n", domain, SEPARATOR, TOMBSTONE),
        }
    }

    /// Decode one log line (without its terminator)
    pub fn decode(line: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        if fields.len() != 2 {
            return Err(format!("expected 2 fields, found {}", fields.len()));
        }

        let (domain, value) = (fields[0], fields[1]);
        validate::domain_name(domain).map_err(|e| e.to_string())?;

        if value == TOMBSTONE {
            return Ok(Self::delete(domain));
        }

        validate::address(value).map_err(|e| e.to_string())?;
        Ok(Self::upsert(domain, value))
    }
}

fn header_line() -> String {
    format!("{}tolinks-log v{}\n", HEADER_PREFIX, FORMAT_VERSION)
}

fn check_header(line: &str, line_no: usize) -> Result<()> {
    let version = line
        .strip_prefix(HEADER_PREFIX)
        .and_then(|rest| rest.strip_prefix("tolinks-log v"))
        .and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| RouteError::format(line_no, format!("unrecognized header '{}'", line)))?;

    if version != FORMAT_VERSION {
        return Err(RouteError::format(
            line_no,
            format!("unsupported log version {}", version),
        ));
    }
    Ok(())
}

/// Handle to the on-disk route log
///
/// The file stays open for the lifetime of the handle and is closed when the
/// handle is dropped.
#[derive(Debug)]
pub struct Journal {
    file: File,
    path: PathBuf,
    broken: bool,
}

impl Journal {
    /// Open the log at `path`, creating it (and its parent directory) if absent
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        if file.metadata()?.len() == 0 {
            file.write_all(header_line().as_bytes())?;
            file.sync_data()?;
            info!("Created route log at {}", path.display());
        }

        Ok(Self {
            file,
            path,
            broken: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and wait until it has reached durable storage
    ///
    /// On failure the file is truncated back to its previous length, so a
    /// torn write never reaches the next record. If that truncate fails too
    /// the journal is marked broken and refuses further appends.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.append_with(record, |file, bytes| {
            file.write_all(bytes)?;
            file.flush()?;
            file.sync_data()
        })?;
        debug!("Appended record for {} to {}", record.domain(), self.path.display());
        Ok(())
    }

    /// True once a failed append could not be rolled back
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    #[cfg(test)]
    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }

    fn append_with<F>(&mut self, record: &Record, write: F) -> Result<()>
    where
        F: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        if self.broken {
            return Err(RouteError::Closed);
        }

        let prev_len = self.file.metadata()?.len();
        let Err(err) = write(&mut self.file, record.encode().as_bytes()) else {
            return Ok(());
        };

        match self.file.set_len(prev_len).and_then(|()| self.file.sync_data()) {
            Ok(()) => warn!(
                "Append to {} failed, rolled back to {} bytes: {}",
                self.path.display(),
                prev_len,
                err
            ),
            Err(rollback) => {
                self.broken = true;
                error!(
                    "Append to {} failed ({}) and rollback failed: {}",
                    self.path.display(),
                    err,
                    rollback
                );
            }
        }
        Err(RouteError::Io(err))
    }

    /// Read every record in file order
    ///
    /// Any malformed line fails the whole replay; there is no partial recovery.
    pub fn replay(&self) -> Result<Vec<Record>> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut line = String::new();
        let mut line_no = 0;

        loop {
            line.clear();
            let read = reader.read_line(&mut line).map_err(|e| {
                if e.kind() == std::io::ErrorKind::InvalidData {
                    RouteError::format(line_no + 1, "line is not valid UTF-8")
                } else {
                    RouteError::Io(e)
                }
            })?;
            if read == 0 {
                break;
            }
            line_no += 1;

            let Some(content) = line.strip_suffix('\n') else {
                return Err(RouteError::format(line_no, "truncated record (missing newline)"));
            };
            let content = content.strip_suffix('\r').unwrap_or(content);

            if line_no == 1 && content.starts_with(HEADER_PREFIX) {
                check_header(content, line_no)?;
                continue;
            }

            let record = Record::decode(content).map_err(|reason| RouteError::format(line_no, reason))?;
            records.push(record);
        }

        debug!("Replayed {} record(s) from {}", records.len(), self.path.display());
        Ok(records)
    }
}
