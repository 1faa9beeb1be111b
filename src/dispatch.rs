//! Запись новых сделок в хранилища и итоговый отчёт запуска.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::reconcile::{Mismatch, Reconciliation, reconcile};
use crate::statement::Statement;
use crate::store::TradeStore;
use crate::types::{Ticket, TradeRecord};

/// Неудачная запись одной сделки.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedWrite {
    /// Тикет.
    pub ticket: Ticket,
    /// Причина с классификацией.
    pub error: StoreError,
}

/// Итог записи решения в одно хранилище.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Создано записей.
    pub created: usize,
    /// Пропущено: тикет уже был в хранилище.
    pub skipped: usize,
    /// Записи, завершившиеся ошибкой.
    pub failed: Vec<FailedWrite>,
}

impl DispatchSummary {
    /// Тикеты неудачных записей.
    pub fn failed_tickets(&self) -> impl Iterator<Item = &Ticket> {
        self.failed.iter().map(|f| &f.ticket)
    }
}

/// Записывает `to_create` по одной сделке, не прерываясь на ошибках.
///
/// Повторов нет: их выполняет следующий запуск, который увидит те же
/// тикеты отсутствующими.
pub async fn dispatch(decision: &Reconciliation, store: &dyn TradeStore) -> DispatchSummary {
    let mut summary = DispatchSummary {
        skipped: decision.already_present.len(),
        ..DispatchSummary::default()
    };

    for record in &decision.to_create {
        match store.create_record(record).await {
            Ok(()) => summary.created += 1,
            Err(error) => {
                warn!(
                    store = store.name(),
                    ticket = %record.ticket,
                    kind = ?error.kind,
                    "write failed: {}",
                    error.message
                );
                summary.failed.push(FailedWrite {
                    ticket: record.ticket.clone(),
                    error,
                });
            }
        }
    }
    summary
}

/// Исход синхронизации с одним хранилищем.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Снимок получен, решение применено.
    Synced {
        /// Итог записи.
        summary: DispatchSummary,
        /// Расхождения с уже записанными сделками.
        mismatches: Vec<Mismatch>,
    },
    /// Снимок получить не удалось, записи не выполнялись.
    Unavailable(StoreError),
}

/// Исход по хранилищу с его именем.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReport {
    /// Имя хранилища.
    pub store: String,
    /// Исход.
    pub outcome: StoreOutcome,
}

/// Сверяет сделки с одним хранилищем и записывает недостающие.
pub async fn sync_store(records: &[TradeRecord], store: &dyn TradeStore) -> StoreReport {
    let outcome = match store.query_known_tickets().await {
        Ok(snapshot) => {
            let decision = reconcile(records, &snapshot);
            let summary = dispatch(&decision, store).await;
            info!(
                store = store.name(),
                created = summary.created,
                skipped = summary.skipped,
                failed = summary.failed.len(),
                mismatches = decision.mismatches.len(),
                "store synced"
            );
            StoreOutcome::Synced {
                summary,
                mismatches: decision.mismatches,
            }
        }
        Err(error) => {
            warn!(store = store.name(), "snapshot query failed: {error}");
            StoreOutcome::Unavailable(error)
        }
    };
    StoreReport {
        store: store.name().to_string(),
        outcome,
    }
}

/// Синхронизирует закрытые сделки выписки со всеми хранилищами параллельно.
///
/// Открытые позиции не записываются: записанный тикет больше не обновляется,
/// и итог позиции попадёт в хранилище после её закрытия. Хранилища
/// независимы: отказ одного не влияет на остальные.
pub async fn sync_stores(statement: &Statement, stores: &[Arc<dyn TradeStore>]) -> SyncReport {
    let closed: Vec<TradeRecord> = statement.closed_trades().cloned().collect();
    let stores = join_all(stores.iter().map(|store| sync_store(&closed, store.as_ref()))).await;
    SyncReport {
        rows_dropped: statement.rows_dropped,
        open_positions: statement.open_positions().count(),
        stores,
    }
}

/// Сводка запуска.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Строк выписки отброшено при разборе.
    pub rows_dropped: usize,
    /// Открытых позиций, отложенных до закрытия.
    pub open_positions: usize,
    /// Исходы по хранилищам в порядке конфигурации.
    pub stores: Vec<StoreReport>,
}

impl SyncReport {
    /// Всего создано записей.
    pub fn created(&self) -> usize {
        self.summaries().map(|s| s.created).sum()
    }

    /// Всего пропущено записей.
    pub fn skipped(&self) -> usize {
        self.summaries().map(|s| s.skipped).sum()
    }

    /// Всего неудачных записей.
    pub fn failed(&self) -> usize {
        self.summaries().map(|s| s.failed.len()).sum()
    }

    /// Всего расхождений.
    pub fn mismatches(&self) -> usize {
        self.stores
            .iter()
            .map(|r| match &r.outcome {
                StoreOutcome::Synced { mismatches, .. } => mismatches.len(),
                StoreOutcome::Unavailable(_) => 0,
            })
            .sum()
    }

    /// Были неудачные записи или недоступные хранилища.
    pub fn has_errors(&self) -> bool {
        self.failed() > 0
            || self
                .stores
                .iter()
                .any(|r| matches!(r.outcome, StoreOutcome::Unavailable(_)))
    }

    fn summaries(&self) -> impl Iterator<Item = &DispatchSummary> {
        self.stores.iter().filter_map(|r| match &r.outcome {
            StoreOutcome::Synced { summary, .. } => Some(summary),
            StoreOutcome::Unavailable(_) => None,
        })
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rows dropped: {}", self.rows_dropped)?;
        if self.open_positions > 0 {
            writeln!(f, "open positions left until closed: {}", self.open_positions)?;
        }
        if self.stores.is_empty() {
            return writeln!(f, "no stores configured");
        }
        for report in &self.stores {
            match &report.outcome {
                StoreOutcome::Unavailable(error) => {
                    writeln!(f, "[{}] unavailable: {error}", report.store)?;
                }
                StoreOutcome::Synced {
                    summary,
                    mismatches,
                } => {
                    write!(
                        f,
                        "[{}] created {}, skipped {}, failed {}, mismatches {}",
                        report.store,
                        summary.created,
                        summary.skipped,
                        summary.failed.len(),
                        mismatches.len()
                    )?;
                    if summary.created == 0 && summary.failed.is_empty() {
                        write!(f, " (no new trades)")?;
                    }
                    writeln!(f)?;
                    for failed in &summary.failed {
                        writeln!(f, "  failed {}: {}", failed.ticket, failed.error)?;
                    }
                    for m in mismatches {
                        writeln!(
                            f,
                            "  mismatch {} {}: local {}, stored {}",
                            m.ticket, m.field, m.local, m.remote
                        )?;
                    }
                }
            }
        }
        if self.has_errors() {
            writeln!(f, "finished with errors")
        } else {
            writeln!(f, "finished without errors")
        }
    }
}
