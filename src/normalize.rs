//! Нормализация текстовых ячеек выписки в типизированные значения.

use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{FieldKind, MalformedField};
use crate::types::{BalanceKind, Money, Side, Ticket, Timestamp};

/// Заявленное в выписке соглашение о десятичном разделителе.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberFormat {
    /// Определить по первому однозначному числу и закрепить до конца выписки.
    #[default]
    Infer,
    /// `1,234.56`
    DotDecimal,
    /// `1.234,56`
    CommaDecimal,
}

impl FromStr for NumberFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "infer" | "auto" => Ok(Self::Infer),
            "dot" | "." => Ok(Self::DotDecimal),
            "comma" | "," => Ok(Self::CommaDecimal),
            _ => Err(s.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecimalMark {
    Dot,
    Comma,
}

impl DecimalMark {
    const fn decimal(self) -> char {
        match self {
            Self::Dot => '.',
            Self::Comma => ',',
        }
    }

    const fn group(self) -> char {
        match self {
            Self::Dot => ',',
            Self::Comma => '.',
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Self::Dot => &DOT_DECIMAL_RE,
            Self::Comma => &COMMA_DECIMAL_RE,
        }
    }
}

enum Inferred {
    Mark(DecimalMark),
    NoSeparators,
    Ambiguous,
}

static DOT_DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d{1,3}(,\d{3})+|\d+)(\.\d+)?$").expect("valid dot-decimal regex")
});

static COMMA_DECIMAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-?(\d{1,3}(\.\d{3})+|\d+)(,\d+)?$").expect("valid comma-decimal regex")
});

/// Форматы даты и времени, встречающиеся в отчётах MT5, в порядке приоритета.
const TIMESTAMP_PATTERNS: [&str; 7] = [
    "%Y.%m.%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Нормализатор полей одной выписки.
///
/// Создаётся заново для каждого разбора: при `NumberFormat::Infer` он
/// закрепляет обнаруженный разделитель и дальше требует его от всех чисел.
#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    format: NumberFormat,
    offset: FixedOffset,
    locked: Option<DecimalMark>,
}

impl FieldNormalizer {
    /// Создаёт нормализатор с заданным соглашением и часовым поясом.
    pub const fn new(format: NumberFormat, offset: FixedOffset) -> Self {
        Self {
            format,
            offset,
            locked: None,
        }
    }

    const fn mark(&self) -> Option<DecimalMark> {
        match self.format {
            NumberFormat::DotDecimal => Some(DecimalMark::Dot),
            NumberFormat::CommaDecimal => Some(DecimalMark::Comma),
            NumberFormat::Infer => self.locked,
        }
    }

    /// Закрепляет соглашение по токену, если тот раскрывает его однозначно и
    /// целиком ему соответствует. Объём вида `0.10 / 0.05` смотрится по первой
    /// части. Возвращает `true`, когда соглашение известно.
    pub fn observe(&mut self, token: &str) -> bool {
        if self.mark().is_some() {
            return true;
        }
        let cleaned = clean_number(token.split('/').next().unwrap_or(token));
        match infer_mark(&cleaned) {
            Inferred::Mark(mark) if mark.pattern().is_match(&cleaned) => {
                debug!(token = %cleaned, decimal = %mark.decimal(), "decimal mark inferred");
                self.locked = Some(mark);
                true
            }
            _ => false,
        }
    }

    /// Разбирает обязательное число.
    pub fn number(&mut self, token: &str) -> Result<Money, MalformedField> {
        let cleaned = clean_number(token);
        if cleaned.is_empty() {
            return Err(MalformedField::new(token, FieldKind::Number, "empty"));
        }

        let mark = match self.mark() {
            Some(mark) => mark,
            None => match infer_mark(&cleaned) {
                Inferred::Mark(mark) => {
                    debug!(token = %cleaned, decimal = %mark.decimal(), "decimal mark inferred");
                    self.locked = Some(mark);
                    mark
                }
                // Без разделителей соглашение не важно.
                Inferred::NoSeparators => DecimalMark::Dot,
                Inferred::Ambiguous => {
                    return Err(MalformedField::new(
                        token,
                        FieldKind::Number,
                        "ambiguous decimal mark",
                    ));
                }
            },
        };

        if !mark.pattern().is_match(&cleaned) {
            return Err(MalformedField::new(
                token,
                FieldKind::Number,
                "does not match the statement's decimal convention",
            ));
        }

        let canonical: String = cleaned
            .chars()
            .filter(|ch| *ch != mark.group())
            .map(|ch| if ch == mark.decimal() { '.' } else { ch })
            .collect();
        Decimal::from_str(&canonical)
            .map_err(|_| MalformedField::new(token, FieldKind::Number, "out of range"))
    }

    /// Разбирает необязательное число: пустая ячейка даёт `None`.
    pub fn number_opt(&mut self, token: Option<&str>) -> Result<Option<Money>, MalformedField> {
        match token {
            Some(t) if !clean_number(t).is_empty() => self.number(t).map(Some),
            _ => Ok(None),
        }
    }

    /// Разбирает объём. MT5 пишет частично закрытые объёмы как `0.10 / 0.05`,
    /// берём первую часть.
    pub fn volume(&mut self, token: &str) -> Result<Money, MalformedField> {
        let head = token.split('/').next().unwrap_or(token);
        let volume = self.number(head)?;
        if volume.is_sign_negative() && !volume.is_zero() {
            return Err(MalformedField::new(token, FieldKind::Number, "negative volume"));
        }
        Ok(volume)
    }

    /// Разбирает дату и время: первый полностью совпавший шаблон побеждает.
    pub fn timestamp(&self, token: &str) -> Result<Timestamp, MalformedField> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(MalformedField::new(token, FieldKind::Timestamp, "empty"));
        }
        let naive = TIMESTAMP_PATTERNS
            .iter()
            .find_map(|pattern| NaiveDateTime::parse_from_str(trimmed, pattern).ok())
            .ok_or_else(|| MalformedField::new(token, FieldKind::Timestamp, "unknown format"))?;
        self.offset
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| MalformedField::new(token, FieldKind::Timestamp, "out of range"))
    }

    /// Разбирает необязательную дату.
    pub fn timestamp_opt(&self, token: Option<&str>) -> Result<Option<Timestamp>, MalformedField> {
        match token {
            Some(t) if !t.trim().is_empty() => self.timestamp(t).map(Some),
            _ => Ok(None),
        }
    }
}

/// Убирает пробелы, разделители групп в виде апострофа и знак плюса.
fn clean_number(input: &str) -> String {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    trimmed
        .chars()
        .filter(|ch| !matches!(*ch, ' ' | '\u{a0}' | '\u{202f}' | '\''))
        .map(|ch| if ch == '\u{2212}' { '-' } else { ch })
        .collect()
}

fn infer_mark(cleaned: &str) -> Inferred {
    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');
    match (last_dot, last_comma) {
        (None, None) => Inferred::NoSeparators,
        (Some(dot), Some(comma)) => Inferred::Mark(if dot > comma {
            DecimalMark::Dot
        } else {
            DecimalMark::Comma
        }),
        (Some(pos), None) | (None, Some(pos)) => {
            let sep = if last_dot.is_some() { '.' } else { ',' };
            let as_decimal = if sep == '.' {
                DecimalMark::Dot
            } else {
                DecimalMark::Comma
            };
            if cleaned.matches(sep).count() > 1 {
                // Повторяющийся знак может быть только разделителем групп.
                return Inferred::Mark(if as_decimal == DecimalMark::Dot {
                    DecimalMark::Comma
                } else {
                    DecimalMark::Dot
                });
            }
            if cleaned[pos + 1..].len() == 3 {
                Inferred::Ambiguous
            } else {
                Inferred::Mark(as_decimal)
            }
        }
    }
}

/// Нормализует код инструмента: верхний регистр, только буквы и цифры.
pub fn symbol(token: &str) -> Result<String, MalformedField> {
    let symbol: String = token
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect();
    if symbol.is_empty() {
        return Err(MalformedField::new(token, FieldKind::Symbol, "empty"));
    }
    Ok(symbol)
}

/// Разбирает направление сделки. Отложенные ордера (`buy limit`) не являются сделкой.
pub fn side(token: &str) -> Result<Side, MalformedField> {
    let lower = token.trim().trim_matches('#').trim().to_lowercase();
    match lower.as_str() {
        "buy" | "買い" => Ok(Side::Buy),
        "sell" | "売り" => Ok(Side::Sell),
        "" => Err(MalformedField::new(token, FieldKind::Side, "empty")),
        _ => Err(MalformedField::new(token, FieldKind::Side, "not a trade side")),
    }
}

/// Разбирает тип балансовой операции.
pub fn balance_kind(token: &str) -> Result<BalanceKind, MalformedField> {
    let lower = token.trim().to_lowercase();
    let kind = match lower.as_str() {
        "" => return Err(MalformedField::new(token, FieldKind::BalanceKind, "empty")),
        "deposit" | "入金" => BalanceKind::Deposit,
        "withdrawal" | "出金" => BalanceKind::Withdrawal,
        "credit" | "クレジット" => BalanceKind::Credit,
        "correction" | "修正" => BalanceKind::Correction,
        "bonus" | "ボーナス" => BalanceKind::Bonus,
        "balance" | "残高" => BalanceKind::Balance,
        _ => BalanceKind::Other(lower),
    };
    Ok(kind)
}

/// Нормализует тикет: без пробелов и ведущего `#`.
pub fn ticket(token: &str) -> Result<Ticket, MalformedField> {
    let compact: String = token.chars().filter(|ch| !ch.is_whitespace()).collect();
    let compact = compact.trim_start_matches('#');
    if compact.is_empty() {
        return Err(MalformedField::new(token, FieldKind::Ticket, "empty"));
    }
    if !compact
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_'))
    {
        return Err(MalformedField::new(token, FieldKind::Ticket, "unexpected characters"));
    }
    Ok(Ticket(compact.to_string()))
}

/// Необязательный текст: пустая ячейка даёт `None`.
pub fn text_opt(token: Option<&str>) -> Option<String> {
    token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
