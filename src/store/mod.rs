//! Хранилища сделок: единый интерфейс запроса тикетов и записи.

mod journal;
mod memory;
mod notion;
mod sheets;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{StoreSnapshot, TradeRecord};

pub use journal::JournalStore;
pub use memory::MemoryStore;
pub use notion::NotionStore;
pub use sheets::SheetsStore;

/// Внешнее хранилище, в которое записываются сделки.
///
/// Реализация должна гарантировать, что успешный `create_record` виден
/// последующему `query_known_tickets`: на этом держится идемпотентность.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Имя хранилища для отчётов и логов.
    fn name(&self) -> &str;

    /// Тикеты, уже записанные в хранилище, и по возможности их поля.
    async fn query_known_tickets(&self) -> Result<StoreSnapshot, StoreError>;

    /// Записывает одну сделку.
    async fn create_record(&self, record: &TradeRecord) -> Result<(), StoreError>;
}
