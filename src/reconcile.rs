//! Сверка канонических сделок со снимком хранилища.
//!
//! Чистая функция без ввода-вывода: записанный в хранилище тикет считается
//! неизменным, расхождения только сообщаются.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;

use serde::Serialize;
use tracing::warn;

use crate::types::{StoreSnapshot, StoredTrade, Ticket, TradeRecord};

/// Поле, по которому локальная сделка расходится с сохранённой.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MismatchField {
    /// Инструмент.
    Symbol,
    /// Направление.
    Side,
    /// Объём.
    Volume,
    /// Прибыль.
    Profit,
    /// Прибыль с учётом свопа и комиссии.
    NetProfit,
}

impl fmt::Display for MismatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Symbol => "symbol",
            Self::Side => "side",
            Self::Volume => "volume",
            Self::Profit => "profit",
            Self::NetProfit => "net profit",
        })
    }
}

/// Тикет есть и локально, и в хранилище, но значения полей различаются.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    /// Тикет.
    pub ticket: Ticket,
    /// Поле.
    pub field: MismatchField,
    /// Локальное значение.
    pub local: String,
    /// Значение в хранилище.
    pub remote: String,
}

/// Решение по одному хранилищу. Пересчитывается на каждом запуске.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Тикетов нет в хранилище: их нужно создать.
    pub to_create: Vec<TradeRecord>,
    /// Тикеты уже записаны и повторно не отправляются.
    pub already_present: Vec<TradeRecord>,
    /// Расхождения среди уже записанных тикетов.
    pub mismatches: Vec<Mismatch>,
}

impl Reconciliation {
    /// Нечего записывать.
    #[inline]
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty()
    }
}

/// Делит сделки на новые и уже известные хранилищу.
///
/// Повторяющийся тикет во входе: побеждает последняя запись, позиция
/// остаётся от первого появления.
pub fn reconcile(records: &[TradeRecord], snapshot: &StoreSnapshot) -> Reconciliation {
    let mut index: HashMap<&Ticket, usize> = HashMap::with_capacity(records.len());
    let mut unique: Vec<&TradeRecord> = Vec::with_capacity(records.len());
    for record in records {
        match index.entry(&record.ticket) {
            Entry::Occupied(slot) => unique[*slot.get()] = record,
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(record);
            }
        }
    }

    let mut decision = Reconciliation::default();
    for record in unique {
        if !snapshot.contains(&record.ticket) {
            decision.to_create.push(record.clone());
            continue;
        }
        if let Some(stored) = snapshot.stored(&record.ticket) {
            for mismatch in compare(record, stored) {
                warn!(
                    ticket = %mismatch.ticket,
                    field = %mismatch.field,
                    local = %mismatch.local,
                    remote = %mismatch.remote,
                    "stored trade differs from statement"
                );
                decision.mismatches.push(mismatch);
            }
        }
        decision.already_present.push(record.clone());
    }
    decision
}

/// Сравнивает только поля, которые хранилище сообщило.
fn compare(record: &TradeRecord, stored: &StoredTrade) -> Vec<Mismatch> {
    let mut out = Vec::new();
    let mut check = |field, local: String, remote: Option<String>| {
        if let Some(remote) = remote {
            if remote != local {
                out.push(Mismatch {
                    ticket: record.ticket.clone(),
                    field,
                    local,
                    remote,
                });
            }
        }
    };

    check(
        MismatchField::Symbol,
        record.symbol.clone(),
        stored.symbol.clone(),
    );
    check(
        MismatchField::Side,
        record.side.to_string(),
        stored.side.map(|s| s.to_string()),
    );
    check(
        MismatchField::Volume,
        record.volume.normalize().to_string(),
        stored.volume.map(|v| v.normalize().to_string()),
    );
    check(
        MismatchField::Profit,
        record.profit.normalize().to_string(),
        stored.profit.map(|p| p.normalize().to_string()),
    );
    check(
        MismatchField::NetProfit,
        record.net_profit().normalize().to_string(),
        stored.net_profit.map(|p| p.normalize().to_string()),
    );
    out
}
