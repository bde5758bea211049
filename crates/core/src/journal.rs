//! Append-only JSONL audit journal.
//!
//! Records are handed to a background writer over an unbounded channel, so a
//! slow disk or a write failure never reaches the decision path. Each file
//! keeps only its most recent `max_entries` lines. The writer drains whatever
//! is queued and rewrites each touched file once per batch.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::position::{ClosedPositionRecord, LogicalPosition};
use crate::types::{Side, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JournalFile {
    Signals,
    ClosedPositions,
    OpenPositionsSnapshot,
}

impl JournalFile {
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Signals => "signals_log.jsonl",
            Self::ClosedPositions => "closed_positions.jsonl",
            Self::OpenPositionsSnapshot => "open_positions_snapshot.jsonl",
        }
    }
}

/// One line of `signals_log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub side: Option<Side>,
    pub signal: Signal,
    pub price: Decimal,
    pub indicators: serde_json::Value,
    pub suppressed_by_bias: bool,
}

/// One line of `open_positions_snapshot.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPositionSnapshot {
    pub snapshot_time: DateTime<Utc>,
    #[serde(flatten)]
    pub position: LogicalPosition,
}

enum JournalMessage {
    Append { file: JournalFile, line: String },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the journal writer.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    tx: Option<mpsc::UnboundedSender<JournalMessage>>,
}

impl std::fmt::Debug for JournalMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append { file, .. } => write!(f, "Append({file:?})"),
            Self::Flush(_) => write!(f, "Flush"),
        }
    }
}

impl Journal {
    /// Spawns the writer task for files under `dir`.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn(dir: impl Into<PathBuf>, max_entries: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = JournalWriter::new(dir.into(), max_entries);
        let handle = tokio::spawn(writer.run(rx));
        (Self { tx: Some(tx) }, handle)
    }

    /// A journal that drops every record.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { tx: None }
    }

    fn append<T: Serialize>(&self, file: JournalFile, entry: &T) {
        let Some(tx) = &self.tx else {
            return;
        };
        match serde_json::to_string(entry) {
            Ok(line) => {
                if tx.send(JournalMessage::Append { file, line }).is_err() {
                    tracing::warn!(file = file.file_name(), "Journal writer gone, record dropped");
                }
            }
            Err(e) => {
                tracing::warn!(file = file.file_name(), error = %e, "Failed to serialize journal record");
            }
        }
    }

    pub fn log_signal(&self, record: &SignalRecord) {
        self.append(JournalFile::Signals, record);
    }

    pub fn log_closed_position(&self, record: &ClosedPositionRecord) {
        self.append(JournalFile::ClosedPositions, record);
    }

    pub fn log_open_positions<'a>(&self, positions: impl IntoIterator<Item = &'a LogicalPosition>) {
        let snapshot_time = Utc::now();
        for position in positions {
            self.append(
                JournalFile::OpenPositionsSnapshot,
                &OpenPositionSnapshot {
                    snapshot_time,
                    position: position.clone(),
                },
            );
        }
    }

    /// Waits until every record sent so far has been written.
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(JournalMessage::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

/// Messages handled per file rewrite.
const MAX_BATCH: usize = 4_096;

struct JournalWriter {
    dir: PathBuf,
    max_entries: usize,
    buffers: HashMap<JournalFile, VecDeque<String>>,
}

impl JournalWriter {
    fn new(dir: PathBuf, max_entries: usize) -> Self {
        Self {
            dir,
            max_entries: max_entries.max(1),
            buffers: HashMap::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<JournalMessage>) {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to create journal directory");
        }
        let mut batch = Vec::new();
        while let Some(msg) = rx.recv().await {
            batch.push(msg);
            while batch.len() < MAX_BATCH {
                match rx.try_recv() {
                    Ok(msg) => batch.push(msg),
                    Err(_) => break,
                }
            }
            self.write_batch(std::mem::take(&mut batch)).await;
        }
    }

    /// Buffers every record of the batch, then rewrites each touched file
    /// once. Flushes are answered after the writes. Returns the number of
    /// files rewritten.
    async fn write_batch(&mut self, batch: Vec<JournalMessage>) -> usize {
        let mut dirty = Vec::new();
        let mut flushes = Vec::new();
        for msg in batch {
            match msg {
                JournalMessage::Append { file, line } => match self.buffer(file, line).await {
                    Ok(()) if !dirty.contains(&file) => dirty.push(file),
                    Ok(()) => {}
                    Err(e) => {
                        tracing::warn!(file = file.file_name(), error = %e, "Failed to load journal file");
                    }
                },
                JournalMessage::Flush(done) => flushes.push(done),
            }
        }

        let mut written = 0;
        for file in dirty {
            match self.rewrite(file).await {
                Ok(()) => written += 1,
                Err(e) => tracing::warn!(file = file.file_name(), error = %e, "Journal write failed"),
            }
        }
        for done in flushes {
            let _ = done.send(());
        }
        written
    }

    async fn buffer(&mut self, file: JournalFile, line: String) -> std::io::Result<()> {
        if !self.buffers.contains_key(&file) {
            let existing = load_lines(&self.dir.join(file.file_name())).await?;
            self.buffers.insert(file, existing);
        }
        let max_entries = self.max_entries;
        if let Some(buffer) = self.buffers.get_mut(&file) {
            buffer.push_back(line);
            while buffer.len() > max_entries {
                buffer.pop_front();
            }
        }
        Ok(())
    }

    async fn rewrite(&self, file: JournalFile) -> std::io::Result<()> {
        let Some(buffer) = self.buffers.get(&file) else {
            return Ok(());
        };
        let mut body = String::new();
        for entry in buffer {
            body.push_str(entry);
            body.push('\n');
        }
        let path = self.dir.join(file.file_name());
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await
    }
}

async fn load_lines(path: &Path) -> std::io::Result<VecDeque<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VecDeque::new()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn signal_record(price: Decimal) -> SignalRecord {
        SignalRecord {
            timestamp: Utc::now(),
            side: Some(Side::Long),
            signal: Signal::Buy,
            price,
            indicators: serde_json::json!({ "ema": "100.0" }),
            suppressed_by_bias: false,
        }
    }

    #[tokio::test]
    async fn keeps_only_most_recent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let (journal, _handle) = Journal::spawn(dir.path(), 3);

        for i in 0..5 {
            journal.log_signal(&signal_record(Decimal::from(100 + i)));
        }
        journal.flush().await;

        let text = std::fs::read_to_string(dir.path().join("signals_log.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: SignalRecord = serde_json::from_str(lines[0]).unwrap();
        let last: SignalRecord = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(first.price, dec!(102));
        assert_eq!(last.price, dec!(104));
    }

    #[tokio::test]
    async fn appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("signals_log.jsonl"), "{\"old\":1}\n").unwrap();

        let (journal, _handle) = Journal::spawn(dir.path(), 10);
        journal.log_signal(&signal_record(dec!(1)));
        journal.flush().await;

        let text = std::fs::read_to_string(dir.path().join("signals_log.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("{\"old\":1}"));
    }

    #[tokio::test]
    async fn queued_records_are_written_in_one_pass_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JournalWriter::new(dir.path().to_path_buf(), 50);

        let mut batch: Vec<JournalMessage> = (0..200)
            .map(|i| JournalMessage::Append {
                file: JournalFile::Signals,
                line: format!("{{\"n\":{i}}}"),
            })
            .collect();
        batch.push(JournalMessage::Append {
            file: JournalFile::ClosedPositions,
            line: "{}".to_string(),
        });
        let (done_tx, done_rx) = oneshot::channel();
        batch.push(JournalMessage::Flush(done_tx));

        assert_eq!(writer.write_batch(batch).await, 2);
        done_rx.await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("signals_log.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 50);
        assert_eq!(lines[0], "{\"n\":150}");
        assert_eq!(lines[49], "{\"n\":199}");
        assert!(!dir.path().join("signals_log.jsonl.tmp").exists());
    }

    #[tokio::test]
    async fn disabled_journal_is_a_no_op() {
        let journal = Journal::disabled();
        journal.log_signal(&signal_record(dec!(1)));
        journal.flush().await;
    }
}
