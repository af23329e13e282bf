//! Moves old messages out of the store into one gzip JSON file per UTC day.
//!
//! A message is deleted from the store only after it has been read back from
//! its archive file. Re-running over the same window is a no-op.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use confessit_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::Message;
use crate::store::Store;

const FILE_PREFIX: &str = "messages_";
const FILE_SUFFIX: &str = ".json.gz";

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    pub archived_count: usize,
    pub deleted_count: usize,
    pub archive_files: Vec<String>,
    pub cutoff: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveFile {
    pub filename: String,
    pub date: NaiveDate,
    pub size_kb: f64,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveFilter {
    /// Matches either the sender or the receiver.
    pub user: Option<String>,
    pub conversation_id: Option<Uuid>,
}

impl ArchiveFilter {
    fn matches(&self, message: &Message) -> bool {
        let user_ok = self
            .user
            .as_deref()
            .map_or(true, |u| message.sender_id == u || message.receiver_id == u);
        let conversation_ok = self
            .conversation_id
            .map_or(true, |id| message.conversation_id == id);
        user_ok && conversation_ok
    }
}

pub struct MessageArchiver {
    store: Arc<dyn Store>,
    dir: PathBuf,
}

impl MessageArchiver {
    pub fn new(store: Arc<dyn Store>, dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            dir: dir.into(),
        }
    }

    pub async fn archive(&self, older_than: Duration) -> AppResult<ArchiveSummary> {
        let cutoff = Utc::now()
            .checked_sub_signed(older_than)
            .ok_or_else(|| AppError::Validation("archive age is out of range".into()))?;
        let candidates = self.store.messages_older_than(cutoff).await?;
        if candidates.is_empty() {
            return Ok(ArchiveSummary {
                archived_count: 0,
                deleted_count: 0,
                archive_files: Vec::new(),
                cutoff,
            });
        }

        let mut by_day: BTreeMap<NaiveDate, Vec<Message>> = BTreeMap::new();
        for message in candidates {
            by_day.entry(message.timestamp.date_naive()).or_default().push(message);
        }

        let dir = self.dir.clone();
        let (archive_files, verified) = tokio::task::spawn_blocking(move || write_days(&dir, by_day))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .map_err(|e| AppError::Internal(anyhow::Error::new(e).context("writing message archive")))?;

        let deleted_count = self.store.delete_messages(&verified).await?;

        tracing::info!(
            archived = verified.len(),
            deleted = deleted_count,
            files = archive_files.len(),
            cutoff = %cutoff,
            "messages archived"
        );

        Ok(ArchiveSummary {
            archived_count: verified.len(),
            deleted_count,
            archive_files,
            cutoff,
        })
    }

    /// Newest date first.
    pub async fn list_archives(&self) -> AppResult<Vec<ArchiveFile>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || list_dir(&dir))
            .await
            .map_err(|e| AppError::Internal(e.into()))?
            .map_err(|e| AppError::Internal(e.into()))
    }

    /// A day with no archive reads as empty.
    pub async fn read_archive(&self, date: &str, filter: ArchiveFilter) -> AppResult<Vec<Message>> {
        let day = parse_day(date)?;
        let path = self.dir.join(file_name(day));

        let messages = tokio::task::spawn_blocking(move || {
            if path.exists() {
                read_file(&path)
            } else {
                Ok(Vec::new())
            }
        })
        .await
        .map_err(|e| AppError::Internal(e.into()))?
        .map_err(|e| AppError::Internal(e.into()))?;

        Ok(messages.into_iter().filter(|m| filter.matches(m)).collect())
    }
}

fn parse_day(date: &str) -> AppResult<NaiveDate> {
    let invalid = || AppError::new(ErrorCode::InvalidArchiveDate, "date must be YYYY-MM-DD");
    if date.len() != 10 {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid())
}

fn file_name(day: NaiveDate) -> String {
    format!("{FILE_PREFIX}{day}{FILE_SUFFIX}")
}

fn day_of(file_name: &str) -> Option<NaiveDate> {
    let raw = file_name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn read_file(path: &Path) -> io::Result<Vec<Message>> {
    let decoder = GzDecoder::new(BufReader::new(File::open(path)?));
    Ok(serde_json::from_reader(decoder)?)
}

fn write_file(path: &Path, messages: &[Message]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&tmp)?), Compression::default());
        serde_json::to_writer(&mut encoder, messages)?;
        encoder.finish()?.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Returns the files written and the ids confirmed present on disk.
fn write_days(dir: &Path, by_day: BTreeMap<NaiveDate, Vec<Message>>) -> io::Result<(Vec<String>, Vec<Uuid>)> {
    std::fs::create_dir_all(dir)?;

    let mut files = Vec::new();
    let mut verified = Vec::new();

    for (day, batch) in by_day {
        let name = file_name(day);
        let path = dir.join(&name);

        let mut merged = if path.exists() { read_file(&path)? } else { Vec::new() };
        let mut seen: HashSet<Uuid> = merged.iter().map(|m| m.id).collect();
        let batch_ids: Vec<Uuid> = batch.iter().map(|m| m.id).collect();
        merged.extend(batch.into_iter().filter(|m| seen.insert(m.id)));
        merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));

        write_file(&path, &merged)?;

        let on_disk: HashSet<Uuid> = read_file(&path)?.into_iter().map(|m| m.id).collect();
        let confirmed: Vec<Uuid> = batch_ids.into_iter().filter(|id| on_disk.contains(id)).collect();
        tracing::debug!(file = %name, messages = confirmed.len(), "archive file verified");

        verified.extend(confirmed);
        files.push(name);
    }

    Ok((files, verified))
}

fn list_dir(dir: &Path) -> io::Result<Vec<ArchiveFile>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut archives = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let filename = entry.file_name().to_string_lossy().into_owned();
        let Some(date) = day_of(&filename) else {
            continue;
        };
        let metadata = entry.metadata()?;
        archives.push(ArchiveFile {
            filename,
            date,
            size_kb: (metadata.len() as f64 / 1024.0 * 100.0).round() / 100.0,
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    archives.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(archives)
}
