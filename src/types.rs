//! Канонические типы выписки: сделки, балансовые операции и снимки хранилищ.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Денежное значение, используем `Decimal` для точных расчётов.
pub type Money = Decimal;

/// Момент времени в фиксированном часовом поясе выписки.
pub type Timestamp = DateTime<FixedOffset>;

/// Номер тикета, присвоенный брокером. Естественный ключ дедупликации.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(pub String);

impl Ticket {
    /// Строковое представление тикета.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Ticket {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Направление сделки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Покупка.
    Buy,
    /// Продажа.
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        })
    }
}

/// Открытая или закрытая позиция из выписки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Тикет позиции.
    pub ticket: Ticket,
    /// Инструмент в верхнем регистре без разделителей.
    pub symbol: String,
    /// Направление.
    pub side: Side,
    /// Объём в лотах.
    pub volume: Money,
    /// Время открытия.
    pub open_time: Timestamp,
    /// Время закрытия, `None` для открытой позиции.
    pub close_time: Option<Timestamp>,
    /// Цена открытия.
    pub open_price: Option<Money>,
    /// Цена закрытия.
    pub close_price: Option<Money>,
    /// Прибыль из столбца отчёта, без пересчёта.
    pub profit: Money,
    /// Своп, если отчёт выделяет его отдельно.
    pub swap: Option<Money>,
    /// Комиссия, если отчёт выделяет её отдельно.
    pub commission: Option<Money>,
    /// Комментарий брокера.
    pub comment: Option<String>,
}

impl TradeRecord {
    /// Позиция ещё открыта.
    #[inline]
    pub const fn is_open(&self) -> bool {
        self.close_time.is_none()
    }

    /// Прибыль с учётом свопа и комиссии.
    pub fn net_profit(&self) -> Money {
        self.profit + self.swap.unwrap_or_default() + self.commission.unwrap_or_default()
    }

    /// Результат в пунктах: для пар с JPY шаг 0.01, для остальных 0.0001.
    pub fn pips(&self) -> Option<Money> {
        let (open, close) = (self.open_price?, self.close_price?);
        let mut diff = close - open;
        if self.side == Side::Sell {
            diff = -diff;
        }
        let scale = if self.symbol.contains("JPY") {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::from(10_000)
        };
        Some((diff * scale).round_dp(2))
    }

    /// Время удержания позиции.
    pub fn holding_time(&self) -> Option<Duration> {
        self.close_time.map(|close| close - self.open_time)
    }
}

/// Тип балансовой операции.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    /// Пополнение.
    Deposit,
    /// Вывод средств.
    Withdrawal,
    /// Кредитные средства брокера.
    Credit,
    /// Корректировка.
    Correction,
    /// Бонус.
    Bonus,
    /// Операция без уточнения (`balance` в MT5).
    Balance,
    /// Прочий тип из отчёта.
    Other(String),
}

/// Пополнение, вывод или корректировка баланса.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEvent {
    /// Порядковый номер внутри раздела, с единицы.
    pub sequence: usize,
    /// Время операции.
    pub time: Timestamp,
    /// Сумма со знаком.
    pub amount: Money,
    /// Тип операции.
    pub kind: BalanceKind,
    /// Комментарий.
    pub comment: Option<String>,
}

impl BalanceEvent {
    /// Ключ дедупликации балансовых операций.
    pub(crate) fn dedup_key(&self) -> (Timestamp, Money, BalanceKind) {
        (self.time, self.amount, self.kind.clone())
    }
}

/// Поля сделки, которые хранилище может вернуть для сверки.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTrade {
    /// Инструмент.
    pub symbol: Option<String>,
    /// Направление.
    pub side: Option<Side>,
    /// Объём.
    pub volume: Option<Money>,
    /// Прибыль.
    pub profit: Option<Money>,
    /// Прибыль с учётом свопа и комиссии.
    pub net_profit: Option<Money>,
}

impl From<&TradeRecord> for StoredTrade {
    fn from(record: &TradeRecord) -> Self {
        Self {
            symbol: Some(record.symbol.clone()),
            side: Some(record.side),
            volume: Some(record.volume),
            profit: Some(record.profit),
            net_profit: Some(record.net_profit()),
        }
    }
}

/// Снимок хранилища: известные тикеты и, если доступны, сохранённые поля.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    tickets: HashMap<Ticket, Option<StoredTrade>>,
}

impl StoreSnapshot {
    /// Пустой снимок.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет тикет без сохранённых полей.
    pub fn insert_ticket(&mut self, ticket: Ticket) {
        self.tickets.entry(ticket).or_insert(None);
    }

    /// Добавляет тикет вместе с полями, которые вернуло хранилище.
    pub fn insert_stored(&mut self, ticket: Ticket, stored: StoredTrade) {
        self.tickets.insert(ticket, Some(stored));
    }

    /// Тикет уже есть в хранилище.
    #[inline]
    pub fn contains(&self, ticket: &Ticket) -> bool {
        self.tickets.contains_key(ticket)
    }

    /// Сохранённые поля тикета, если хранилище их сообщило.
    pub fn stored(&self, ticket: &Ticket) -> Option<&StoredTrade> {
        self.tickets.get(ticket).and_then(Option::as_ref)
    }

    /// Количество известных тикетов.
    #[inline]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Снимок пуст.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

impl FromIterator<Ticket> for StoreSnapshot {
    fn from_iter<I: IntoIterator<Item = Ticket>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for ticket in iter {
            snapshot.insert_ticket(ticket);
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn record(symbol: &str, side: Side, open: &str, close: &str) -> TradeRecord {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        TradeRecord {
            ticket: Ticket::from("1"),
            symbol: symbol.to_string(),
            side,
            volume: Decimal::from_str("0.10").unwrap(),
            open_time: tz.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap(),
            close_time: Some(tz.with_ymd_and_hms(2024, 1, 2, 11, 30, 0).unwrap()),
            open_price: Some(Decimal::from_str(open).unwrap()),
            close_price: Some(Decimal::from_str(close).unwrap()),
            profit: Decimal::from_str("12.34").unwrap(),
            swap: Some(Decimal::from_str("-0.50").unwrap()),
            commission: None,
            comment: None,
        }
    }

    #[test]
    fn pips_depend_on_quote_currency_and_side() {
        let eur = record("EURUSD", Side::Buy, "1.08500", "1.08623");
        assert_eq!(eur.pips(), Some(Decimal::from_str("12.3").unwrap()));

        let jpy = record("USDJPY", Side::Sell, "150.500", "150.123");
        assert_eq!(jpy.pips(), Some(Decimal::from_str("37.7").unwrap()));
    }

    #[test]
    fn net_profit_and_holding_time() {
        let trade = record("EURUSD", Side::Buy, "1", "1");
        assert_eq!(trade.net_profit(), Decimal::from_str("11.84").unwrap());
        assert_eq!(trade.holding_time(), Some(Duration::minutes(90)));
        assert!(!trade.is_open());
    }

    #[test]
    fn snapshot_keeps_stored_fields() {
        let mut snapshot: StoreSnapshot = [Ticket::from("1")].into_iter().collect();
        snapshot.insert_ticket(Ticket::from("1"));
        assert!(snapshot.contains(&Ticket::from("1")));
        assert!(snapshot.stored(&Ticket::from("1")).is_none());

        let trade = record("EURUSD", Side::Buy, "1", "1");
        snapshot.insert_stored(Ticket::from("2"), StoredTrade::from(&trade));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.stored(&Ticket::from("2")).and_then(|s| s.symbol.as_deref()),
            Some("EURUSD")
        );
    }
}
