//! Хранилище в памяти процесса.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::TradeStore;
use crate::error::StoreError;
use crate::types::{StoreSnapshot, StoredTrade, Ticket, TradeRecord};

/// Хранилище в памяти. Сообщает сохранённые поля, поэтому позволяет
/// обнаруживать расхождения; ошибки можно задать заранее.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    records: Mutex<BTreeMap<Ticket, TradeRecord>>,
    write_failures: HashMap<Ticket, StoreError>,
    query_failure: Option<StoreError>,
}

impl MemoryStore {
    /// Пустое хранилище с именем.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Заполняет хранилище уже записанными сделками.
    #[must_use]
    pub fn with_records<I: IntoIterator<Item = TradeRecord>>(mut self, records: I) -> Self {
        self.records
            .get_mut()
            .extend(records.into_iter().map(|r| (r.ticket.clone(), r)));
        self
    }

    /// Запись указанного тикета будет завершаться ошибкой.
    #[must_use]
    pub fn with_write_failure(mut self, ticket: Ticket, error: StoreError) -> Self {
        self.write_failures.insert(ticket, error);
        self
    }

    /// Запрос снимка будет завершаться ошибкой.
    #[must_use]
    pub fn with_query_failure(mut self, error: StoreError) -> Self {
        self.query_failure = Some(error);
        self
    }

    /// Копия записанных сделок в порядке тикетов.
    pub async fn records(&self) -> Vec<TradeRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Количество записанных сделок.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl TradeStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_known_tickets(&self) -> Result<StoreSnapshot, StoreError> {
        if let Some(err) = &self.query_failure {
            return Err(err.clone());
        }
        let records = self.records.lock().await;
        let mut snapshot = StoreSnapshot::new();
        for (ticket, record) in records.iter() {
            snapshot.insert_stored(ticket.clone(), StoredTrade::from(record));
        }
        Ok(snapshot)
    }

    async fn create_record(&self, record: &TradeRecord) -> Result<(), StoreError> {
        if let Some(err) = self.write_failures.get(&record.ticket) {
            return Err(err.clone());
        }
        let mut records = self.records.lock().await;
        if records.contains_key(&record.ticket) {
            return Err(StoreError::permanent(format!(
                "ticket {} already recorded",
                record.ticket
            )));
        }
        records.insert(record.ticket.clone(), record.clone());
        Ok(())
    }
}
