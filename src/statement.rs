//! Разбор выписки в канонические сделки и балансовые операции.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::FixedOffset;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{FieldKind, MalformedField, StatementError};
use crate::extract::{Extracted, Section, SectionExtractor};
use crate::layout::{ColumnMap, Field, fields_for};
use crate::normalize::{self, FieldNormalizer, NumberFormat};
use crate::raw::{DomStatement, RawStatement, StatementFormat};
use crate::types::{BalanceEvent, TradeRecord};

/// Часовой пояс по умолчанию: время сервера в отчётах трактуется как UTC+9.
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// Часовой пояс по умолчанию в виде `FixedOffset`.
pub fn default_utc_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).expect("valid default offset")
}

/// Настройки разбора одной выписки.
#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    /// Соглашение о десятичном разделителе.
    pub number_format: NumberFormat,
    /// Часовой пояс, в котором записано время отчёта.
    pub utc_offset: FixedOffset,
    /// Разделитель CSV; при `None` определяется автоматически.
    pub delimiter: Option<u8>,
    /// Загружать ли балансовые операции.
    pub load_balance: bool,
    /// Принудительный формат вместо определённого по файлу.
    pub format: Option<StatementFormat>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            number_format: NumberFormat::Infer,
            utc_offset: default_utc_offset(),
            delimiter: None,
            load_balance: true,
            format: None,
        }
    }
}

/// Некритичная проблема разбора.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ParseWarning {
    /// Строка отброшена: ячейка не прошла нормализацию.
    MalformedRow {
        /// Раздел.
        section: Section,
        /// Номер строки.
        line: usize,
        /// Причина.
        error: MalformedField,
    },
    /// Строку не удалось прочитать как запись CSV.
    UnreadableRow {
        /// Раздел.
        section: Section,
        /// Номер строки.
        line: usize,
        /// Причина.
        reason: String,
    },
    /// В заголовке раздела нет обязательных столбцов; строки раздела отброшены.
    MissingColumns {
        /// Раздел.
        section: Section,
        /// Ненайденные поля.
        columns: Vec<&'static str>,
    },
    /// Раздел с неизвестным заголовком пропущен.
    UnrecognizedSection {
        /// Текст заголовка.
        heading: String,
    },
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedRow {
                section,
                line,
                error,
            } => write!(f, "{section}, line {line}: {error}"),
            Self::UnreadableRow {
                section,
                line,
                reason,
            } => write!(f, "{section}, line {line}: unreadable row: {reason}"),
            Self::MissingColumns { section, columns } => {
                write!(f, "{section}: missing columns {}", columns.join(", "))
            }
            Self::UnrecognizedSection { heading } => {
                write!(f, "unrecognized section '{heading}' skipped")
            }
        }
    }
}

/// Результат разбора одной выписки. Только для чтения потребителями.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Statement {
    /// Сделки: по одной на тикет, закрытые перекрывают открытые.
    pub trades: Vec<TradeRecord>,
    /// Балансовые операции без повторов.
    pub balance_events: Vec<BalanceEvent>,
    /// Предупреждения разбора.
    pub warnings: Vec<ParseWarning>,
    /// Сколько строк данных отброшено.
    pub rows_dropped: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    rows: usize,
    parsed: usize,
}

impl Statement {
    /// Парсит выписку с настройками по умолчанию.
    #[inline]
    pub fn parse(raw: &RawStatement) -> Result<Self, StatementError> {
        Self::parse_with_options(raw, ParseOptions::default())
    }

    /// Парсит выписку с заданными настройками.
    pub fn parse_with_options(
        raw: &RawStatement,
        options: ParseOptions,
    ) -> Result<Self, StatementError> {
        match options.format.unwrap_or(raw.format) {
            StatementFormat::Markup => {
                let dom = DomStatement::parse(raw);
                assemble(SectionExtractor::markup(&dom), options)
            }
            StatementFormat::Delimited => assemble(
                SectionExtractor::delimited(&raw.content, options.delimiter),
                options,
            ),
        }
    }

    /// Открытые позиции итогового набора.
    pub fn open_positions(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| t.is_open())
    }

    /// Закрытые сделки итогового набора.
    pub fn closed_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| !t.is_open())
    }
}

fn assemble<I>(items: I, options: ParseOptions) -> Result<Statement, StatementError>
where
    I: Iterator<Item = Extracted>,
{
    let mut normalizer = FieldNormalizer::new(options.number_format, options.utc_offset);
    let mut tallies: BTreeMap<Section, Tally> = BTreeMap::new();
    let mut columns: Option<ColumnMap> = None;
    let mut open = Vec::new();
    let mut closed = Vec::new();
    let mut balance = Vec::new();
    let mut warnings = Vec::new();
    let mut rows_dropped = 0;
    let mut balance_seq = 0;

    let items: Vec<Extracted> = items.collect();
    if options.number_format == NumberFormat::Infer {
        prime_decimal_mark(&items, &mut normalizer);
    }

    for item in items {
        match item {
            Extracted::Heading { section } => {
                tallies.entry(section).or_default();
                columns = None;
            }
            Extracted::Skipped { heading } => {
                columns = None;
                warnings.push(ParseWarning::UnrecognizedSection { heading });
            }
            Extracted::Header { section, cells } => {
                let Some(fields) = fields_for(section) else {
                    continue;
                };
                match ColumnMap::resolve(fields, &cells) {
                    Ok(map) => columns = Some(map),
                    Err(missing) => {
                        warn!(
                            %section,
                            columns = ?missing,
                            "section header lacks required columns"
                        );
                        columns = None;
                        warnings.push(ParseWarning::MissingColumns {
                            section,
                            columns: missing,
                        });
                    }
                }
            }
            Extracted::Unreadable {
                section,
                line,
                reason,
            } => {
                if fields_for(section).is_none() {
                    continue;
                }
                warn!(%section, line, %reason, "dropping unreadable row");
                tallies.entry(section).or_default().rows += 1;
                rows_dropped += 1;
                warnings.push(ParseWarning::UnreadableRow {
                    section,
                    line,
                    reason,
                });
            }
            Extracted::Row {
                section,
                line,
                cells,
            } => {
                if fields_for(section).is_none()
                    || (section == Section::BalanceOperations && !options.load_balance)
                {
                    continue;
                }
                let tally = tallies.entry(section).or_default();
                let Some(map) = columns.as_ref() else {
                    tally.rows += 1;
                    rows_dropped += 1;
                    continue;
                };

                let key_field = if section == Section::BalanceOperations {
                    Field::Time
                } else {
                    Field::Ticket
                };
                if map.cell(&cells, key_field).is_none_or(|c| c.trim().is_empty()) {
                    // Итоговые и служебные строки таблицы записями не являются.
                    debug!(%section, line, "skipping row without a key cell");
                    continue;
                }
                tally.rows += 1;

                let parsed = match section {
                    Section::BalanceOperations => {
                        balance_seq += 1;
                        parse_balance(map, &cells, balance_seq, &mut normalizer)
                            .map(|event| balance.push(event))
                    }
                    Section::OpenPositions => {
                        parse_trade(map, &cells, section, &mut normalizer).map(|t| open.push(t))
                    }
                    Section::ClosedDeals => {
                        parse_trade(map, &cells, section, &mut normalizer).map(|t| closed.push(t))
                    }
                    Section::Summary => continue,
                };
                match parsed {
                    Ok(()) => tally.parsed += 1,
                    Err(error) => {
                        warn!(%section, line, %error, "dropping malformed row");
                        rows_dropped += 1;
                        warnings.push(ParseWarning::MalformedRow {
                            section,
                            line,
                            error,
                        });
                    }
                }
            }
        }
    }

    if tallies.is_empty() {
        return Err(StatementError::NoSections);
    }
    if let Some((section, tally)) = tallies
        .iter()
        .find(|(_, tally)| tally.rows > 0 && tally.parsed == 0)
    {
        return Err(StatementError::EmptySection {
            section: *section,
            dropped: tally.rows,
        });
    }

    Ok(Statement {
        trades: merge_by_ticket(open, closed),
        balance_events: dedup_balance(balance),
        warnings,
        rows_dropped,
    })
}

const NUMERIC_FIELDS: [Field; 7] = [
    Field::Volume,
    Field::OpenPrice,
    Field::ClosePrice,
    Field::Commission,
    Field::Swap,
    Field::Profit,
    Field::Amount,
];

/// Ищет во всей выписке первое число, однозначно задающее десятичный
/// разделитель, и закрепляет его до разбора строк.
fn prime_decimal_mark(items: &[Extracted], normalizer: &mut FieldNormalizer) {
    let mut columns: Option<ColumnMap> = None;
    for item in items {
        match item {
            Extracted::Header { section, cells } => {
                columns = fields_for(*section)
                    .and_then(|fields| ColumnMap::resolve(fields, cells).ok());
            }
            Extracted::Heading { .. } | Extracted::Skipped { .. } => columns = None,
            Extracted::Row { cells, .. } => {
                let Some(map) = columns.as_ref() else {
                    continue;
                };
                if NUMERIC_FIELDS
                    .iter()
                    .filter_map(|field| map.cell(cells, *field))
                    .any(|token| normalizer.observe(token))
                {
                    return;
                }
            }
            Extracted::Unreadable { .. } => {}
        }
    }
}

/// Открытые позиции, затем закрытые сделки: закрытая версия тикета
/// перезаписывает открытую. Порядок задаёт первое появление тикета.
fn merge_by_ticket(open: Vec<TradeRecord>, closed: Vec<TradeRecord>) -> Vec<TradeRecord> {
    let mut index = HashMap::new();
    let mut trades: Vec<TradeRecord> = Vec::with_capacity(open.len() + closed.len());
    for record in open.into_iter().chain(closed) {
        match index.entry(record.ticket.clone()) {
            Entry::Occupied(slot) => {
                debug!(ticket = %record.ticket, "ticket superseded by a later row");
                trades[*slot.get()] = record;
            }
            Entry::Vacant(slot) => {
                slot.insert(trades.len());
                trades.push(record);
            }
        }
    }
    trades
}

fn dedup_balance(events: Vec<BalanceEvent>) -> Vec<BalanceEvent> {
    let mut seen = HashSet::new();
    events
        .into_iter()
        .filter(|event| {
            let fresh = seen.insert(event.dedup_key());
            if !fresh {
                debug!(sequence = event.sequence, "duplicate balance operation dropped");
            }
            fresh
        })
        .collect()
}

fn parse_trade(
    map: &ColumnMap,
    row: &[String],
    section: Section,
    n: &mut FieldNormalizer,
) -> Result<TradeRecord, MalformedField> {
    let cell = |field| map.cell(row, field);
    let required = |field| map.cell(row, field).unwrap_or_default();

    let ticket = normalize::ticket(required(Field::Ticket))?;
    let symbol = normalize::symbol(required(Field::Symbol))?;
    let side = normalize::side(required(Field::Side))?;
    let volume = n.volume(required(Field::Volume))?;
    let open_time = n.timestamp(required(Field::OpenTime))?;
    let close_time = n.timestamp_opt(cell(Field::CloseTime))?;
    if section == Section::ClosedDeals && close_time.is_none() {
        return Err(MalformedField::new(
            "",
            FieldKind::Timestamp,
            "closed deal without close time",
        ));
    }

    Ok(TradeRecord {
        ticket,
        symbol,
        side,
        volume,
        open_time,
        close_time,
        open_price: n.number_opt(cell(Field::OpenPrice))?,
        close_price: n.number_opt(cell(Field::ClosePrice))?,
        commission: n.number_opt(cell(Field::Commission))?,
        swap: n.number_opt(cell(Field::Swap))?,
        profit: n.number(required(Field::Profit))?,
        comment: normalize::text_opt(cell(Field::Comment)),
    })
}

fn parse_balance(
    map: &ColumnMap,
    row: &[String],
    sequence: usize,
    n: &mut FieldNormalizer,
) -> Result<BalanceEvent, MalformedField> {
    let required = |field| map.cell(row, field).unwrap_or_default();
    Ok(BalanceEvent {
        sequence,
        time: n.timestamp(required(Field::Time))?,
        kind: normalize::balance_kind(required(Field::Kind))?,
        amount: n.number(required(Field::Amount))?,
        comment: normalize::text_opt(map.cell(row, Field::Comment)),
    })
}

/// Builder для разбора выписки с выбором настроек.
pub struct StatementBuilder<'a> {
    raw: &'a RawStatement,
    options: ParseOptions,
}

impl<'a> StatementBuilder<'a> {
    /// Создаёт builder для указанной выписки.
    ///
    /// # Пример
    ///
    /// ```
    /// # use mt5_statement_sync::{NumberFormat, RawStatement, StatementBuilder};
    /// let raw = RawStatement::from_str(
    ///     "Ticket,Symbol,Type,Volume,Time,Profit\n1,EURUSD,buy,1,2024.01.02 10:00,5\n",
    /// );
    /// let statement = StatementBuilder::new(&raw)
    ///     .number_format(NumberFormat::DotDecimal)
    ///     .parse()
    ///     .unwrap();
    /// assert_eq!(statement.trades.len(), 1);
    /// ```
    #[inline]
    pub fn new(raw: &'a RawStatement) -> Self {
        Self {
            raw,
            options: ParseOptions::default(),
        }
    }

    /// Заменяет все настройки разом.
    #[inline]
    #[must_use]
    pub const fn options(mut self, options: ParseOptions) -> Self {
        self.options = options;
        self
    }

    /// Задаёт соглашение о десятичном разделителе.
    #[inline]
    #[must_use]
    pub const fn number_format(mut self, format: NumberFormat) -> Self {
        self.options.number_format = format;
        self
    }

    /// Задаёт часовой пояс отчёта.
    #[inline]
    #[must_use]
    pub const fn utc_offset(mut self, offset: FixedOffset) -> Self {
        self.options.utc_offset = offset;
        self
    }

    /// Задаёт разделитель CSV.
    #[inline]
    #[must_use]
    pub const fn delimiter(mut self, delimiter: u8) -> Self {
        self.options.delimiter = Some(delimiter);
        self
    }

    /// Включает или отключает балансовые операции.
    #[inline]
    #[must_use]
    pub const fn balance_operations(mut self, enabled: bool) -> Self {
        self.options.load_balance = enabled;
        self
    }

    /// Принудительно задаёт формат.
    #[inline]
    #[must_use]
    pub const fn format(mut self, format: StatementFormat) -> Self {
        self.options.format = Some(format);
        self
    }

    /// Выполняет разбор с текущими настройками.
    #[inline]
    pub fn parse(self) -> Result<Statement, StatementError> {
        Statement::parse_with_options(self.raw, self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BalanceKind, Side, Ticket};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn parse_csv(csv: &str) -> Result<Statement, StatementError> {
        let raw = RawStatement::from_str(csv);
        StatementBuilder::new(&raw)
            .number_format(NumberFormat::DotDecimal)
            .parse()
    }

    const CLOSED: &str = "Closed Trades,,,,,,,,\n\
        Open Time,Ticket,Symbol,Type,Volume,Open Price,Close Time,Close Price,Profit\n\
        2024.01.02 10:00:00,1001,EURUSD,buy,0.10,1.08500,2024.01.02 11:00:00,1.08623,12.34\n\
        2024.01.03 10:00:00,1002,USDJPY,sell,0.20,150.500,2024.01.03 12:00:00,150.123,50.00\n";

    #[test]
    fn closed_deal_overrides_open_position() {
        let csv = format!(
            "Open Positions,,,,,\n\
             Time,Ticket,Symbol,Type,Volume,Profit\n\
             2024.01.02 10:00:00,1001,EURUSD,buy,0.10,3.00\n\
             2024.01.04 10:00:00,1003,GBPUSD,buy,0.30,-1.00\n\
             \n{CLOSED}"
        );
        let statement = parse_csv(&csv).unwrap();
        let tickets: Vec<&str> = statement.trades.iter().map(|t| t.ticket.as_str()).collect();
        assert_eq!(tickets, vec!["1001", "1003", "1002"]);

        let t1001 = &statement.trades[0];
        assert!(!t1001.is_open());
        assert_eq!(t1001.profit, Decimal::from_str("12.34").unwrap());
        assert_eq!(statement.open_positions().count(), 1);
        assert_eq!(statement.closed_trades().count(), 2);
    }

    #[test]
    fn inferred_mark_does_not_depend_on_row_order() {
        const HEADER: &str =
            "Closed Trades\nOpen Time,Ticket,Symbol,Type,Volume,Open Price,Close Time,Profit\n";
        const YEN: &str = "2024.01.02 10:00:00,7001,USDJPY,buy,1,150.123,2024.01.02 11:00:00,37\n";
        const EURO: &str =
            "2024.01.03 10:00:00,7002,EURUSD,sell,0.10,1.08500,2024.01.03 11:00:00,10.00\n";

        for csv in [format!("{HEADER}{YEN}{EURO}"), format!("{HEADER}{EURO}{YEN}")] {
            let raw = RawStatement::from_str(&csv);
            let statement = Statement::parse(&raw).unwrap();
            assert_eq!(statement.trades.len(), 2);
            assert_eq!(statement.rows_dropped, 0);
            let yen = statement.trades.iter().find(|t| t.ticket.as_str() == "7001").unwrap();
            assert_eq!(yen.open_price, Some(Decimal::from_str("150.123").unwrap()));
        }

        // Без единого однозначного числа соглашение не определить.
        let raw = RawStatement::from_str(&format!("{HEADER}{YEN}"));
        assert!(matches!(
            Statement::parse(&raw),
            Err(StatementError::EmptySection { section: Section::ClosedDeals, dropped: 1 })
        ));
    }

    #[test]
    fn malformed_row_is_isolated() {
        let csv = CLOSED.replace("0.20", "lots");
        let statement = parse_csv(&csv).unwrap();
        assert_eq!(statement.trades.len(), 1);
        assert_eq!(statement.rows_dropped, 1);
        assert!(matches!(
            &statement.warnings[..],
            [ParseWarning::MalformedRow { section: Section::ClosedDeals, line: 4, error }]
                if error.kind == FieldKind::Number && error.token == "lots"
        ));
    }

    #[test]
    fn section_with_only_bad_rows_is_fatal() {
        let csv = "Closed Trades\n\
            Open Time,Ticket,Symbol,Type,Volume,Close Time,Profit\n\
            bad,1,EURUSD,buy,0.1,2024.01.02 11:00,1\n";
        let err = parse_csv(csv).unwrap_err();
        assert!(matches!(
            err,
            StatementError::EmptySection { section: Section::ClosedDeals, dropped: 1 }
        ));
    }

    #[test]
    fn empty_section_body_is_not_an_error() {
        let csv = "Closed Trades\nOpen Time,Ticket,Symbol,Type,Volume,Close Time,Profit\n";
        let statement = parse_csv(csv).unwrap();
        assert!(statement.trades.is_empty());
        assert!(statement.warnings.is_empty());
    }

    #[test]
    fn no_sections_is_fatal() {
        let raw = RawStatement::from_str("<html><body><p>nothing here</p></body></html>");
        assert!(matches!(Statement::parse(&raw), Err(StatementError::NoSections)));
    }

    #[test]
    fn missing_columns_drop_section_rows() {
        let csv = "Closed Trades\nTicket,Symbol,Profit\n1,EURUSD,1\n\n\
                   Balance Operations\nTime,Type,Amount\n2024.01.01 09:00,deposit,1000\n";
        let err = parse_csv(csv).unwrap_err();
        assert!(matches!(err, StatementError::EmptySection { section: Section::ClosedDeals, .. }));
    }

    #[test]
    fn balance_events_are_deduplicated() {
        let csv = "Balance Operations\n\
            Time,Type,Amount,Comment\n\
            2024.01.01 09:00,deposit,1000,first\n\
            2024.01.01 09:00,deposit,1000,repeated\n\
            2024.01.05 09:00,withdrawal,-200,\n";
        let statement = parse_csv(csv).unwrap();
        assert_eq!(statement.balance_events.len(), 2);
        assert_eq!(statement.balance_events[0].comment.as_deref(), Some("first"));
        assert_eq!(statement.balance_events[1].sequence, 3);
        assert_eq!(statement.balance_events[1].kind, BalanceKind::Withdrawal);

        let raw = RawStatement::from_str(csv);
        let skipped = StatementBuilder::new(&raw).balance_operations(false).parse().unwrap();
        assert!(skipped.balance_events.is_empty());
    }

    #[test]
    fn rows_without_ticket_are_not_records() {
        let csv = format!("{CLOSED},,,,,,,,62.34\n");
        let statement = parse_csv(&csv).unwrap();
        assert_eq!(statement.trades.len(), 2);
        assert_eq!(statement.rows_dropped, 0);
    }

    #[test]
    fn merge_keeps_last_row_for_repeated_ticket() {
        let csv = format!(
            "{CLOSED}2024.01.05 10:00:00,1001,EURUSD,sell,0.10,,2024.01.05 11:00:00,,-4\n"
        );
        let statement = parse_csv(&csv).unwrap();
        assert_eq!(statement.trades.len(), 2);
        assert_eq!(statement.trades[0].ticket, Ticket::from("1001"));
        assert_eq!(statement.trades[0].side, Side::Sell);
        assert_eq!(statement.trades[0].open_price, None);
    }
}
