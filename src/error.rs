//! Ошибки разбора выписок, синхронизации с хранилищами и конфигурации.

use std::fmt;

use crate::extract::Section;

/// Вид поля, которое нормализатор пытался разобрать.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum FieldKind {
    /// Десятичное число.
    Number,
    /// Дата и время.
    Timestamp,
    /// Код инструмента.
    Symbol,
    /// Направление сделки.
    Side,
    /// Тип балансовой операции.
    BalanceKind,
    /// Номер тикета.
    Ticket,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Number => "number",
            Self::Timestamp => "timestamp",
            Self::Symbol => "symbol",
            Self::Side => "side",
            Self::BalanceKind => "balance kind",
            Self::Ticket => "ticket",
        };
        f.write_str(name)
    }
}

/// Ячейка не прошла нормализацию. Ошибка уровня строки: строка
/// отбрасывается, разбор выписки продолжается.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[error("malformed {kind} '{token}': {reason}")]
pub struct MalformedField {
    /// Исходный текст ячейки.
    pub token: String,
    /// Ожидаемый вид поля.
    pub kind: FieldKind,
    /// Причина отказа.
    pub reason: &'static str,
}

impl MalformedField {
    pub(crate) fn new(token: &str, kind: FieldKind, reason: &'static str) -> Self {
        Self {
            token: token.trim().to_string(),
            kind,
            reason,
        }
    }
}

/// Фатальная ошибка разбора одной выписки.
#[derive(thiserror::Error, Debug)]
pub enum StatementError {
    /// Ошибка ввода-вывода при чтении исходного файла.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Формат файла не удалось определить.
    #[error("Unknown statement format: {0}")]
    UnknownFormat(String),
    /// В выписке не найдено ни одного известного раздела.
    #[error("No recognized sections in statement")]
    NoSections,
    /// Раздел присутствует, но ни одна его строка не разобрана.
    #[error("Section '{section}' is present but none of its {dropped} rows could be parsed")]
    EmptySection {
        /// Раздел выписки.
        section: Section,
        /// Сколько строк было отброшено.
        dropped: usize,
    },
}

/// Классификация ошибки хранилища.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum StoreErrorKind {
    /// Временный сбой (сеть, лимиты, 5xx): повтор может пройти.
    Transient,
    /// Постоянный отказ (валидация, права): повтор не поможет.
    Permanent,
}

/// Ошибка удалённого хранилища при запросе или записи.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[error("{kind:?} store error: {message}")]
pub struct StoreError {
    /// Классификация для диагностики.
    pub kind: StoreErrorKind,
    /// Описание причины.
    pub message: String,
}

impl StoreError {
    /// Временная ошибка.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Постоянная ошибка.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Является ли ошибка временной.
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind == StoreErrorKind::Transient
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::transient(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if is_permanent_status(status) => Self::permanent(err.to_string()),
            _ => Self::transient(err.to_string()),
        }
    }
}

/// 429 и 5xx считаются временными, остальные коды ошибок постоянными.
pub(crate) fn is_permanent_status(status: reqwest::StatusCode) -> bool {
    status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}

/// Ошибка загрузки конфигурации.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Значение переменной окружения не удалось разобрать.
    #[error("Invalid value '{value}' for {key}")]
    Invalid {
        /// Имя переменной.
        key: &'static str,
        /// Некорректное значение.
        value: String,
    },
    /// Задана только часть связанных переменных.
    #[error("{0} must be set together")]
    Incomplete(&'static str),
}
