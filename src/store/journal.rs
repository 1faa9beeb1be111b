//! Локальный журнал сделок в формате JSON Lines.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::TradeStore;
use crate::error::StoreError;
use crate::types::{StoreSnapshot, StoredTrade, TradeRecord};

#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    synced_at: DateTime<Utc>,
    trade: TradeRecord,
}

/// Журнал только на дозапись: одна строка JSON на сделку.
#[derive(Debug)]
pub struct JournalStore {
    name: String,
    path: PathBuf,
    // Дозаписи из одного процесса не должны перемежаться.
    write_lock: Mutex<()>,
}

impl JournalStore {
    /// Журнал в указанном файле. Файл создаётся при первой записи.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            name: "journal".to_string(),
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Путь к файлу журнала.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TradeStore for JournalStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_known_tickets(&self) -> Result<StoreSnapshot, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "journal does not exist yet");
                return Ok(StoreSnapshot::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut snapshot = StoreSnapshot::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: JournalLine = serde_json::from_str(line).map_err(|err| {
                StoreError::permanent(format!(
                    "{}:{}: {err}",
                    self.path.display(),
                    idx + 1
                ))
            })?;
            snapshot.insert_stored(entry.trade.ticket.clone(), StoredTrade::from(&entry.trade));
        }
        Ok(snapshot)
    }

    async fn create_record(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&JournalLine {
            synced_at: Utc::now(),
            trade: record.clone(),
        })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
