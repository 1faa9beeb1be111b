//! Настройки запуска из переменных окружения и файла `.env`.

use std::env;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use chrono::FixedOffset;
use encoding_rs::{Encoding, SHIFT_JIS};
use regex::Regex;

use crate::error::{ConfigError, StoreError};
use crate::normalize::NumberFormat;
use crate::raw::StatementFormat;
use crate::statement::ParseOptions;
use crate::store::{JournalStore, NotionStore, SheetsStore, TradeStore};

const DEFAULT_CREDENTIALS_FILE: &str = "credentials.json";

static OFFSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:UTC)?([+-])(\d{1,2}):?(\d{2})?$").expect("valid offset regex")
});

/// Доступ к базе Notion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionConfig {
    /// Интеграционный ключ.
    pub api_key: String,
    /// Идентификатор базы данных.
    pub database_id: String,
}

/// Доступ к таблице Google Sheets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetsConfig {
    /// Ключ сервисного аккаунта (JSON).
    pub credentials_file: PathBuf,
    /// Идентификатор таблицы.
    pub spreadsheet_id: String,
}

/// Настройки синхронизации.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Настройки разбора выписок.
    pub parse: ParseOptions,
    /// Региональная кодировка для файлов без BOM и не в UTF-8.
    pub encoding: &'static Encoding,
    /// База Notion, если задана.
    pub notion: Option<NotionConfig>,
    /// Таблица Google Sheets, если включена.
    pub sheets: Option<SheetsConfig>,
    /// Локальный журнал, если задан.
    pub journal_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            parse: ParseOptions::default(),
            encoding: SHIFT_JIS,
            notion: None,
            sheets: None,
            journal_path: None,
        }
    }
}

impl SyncConfig {
    /// Загружает `.env`, если он есть, и читает переменные окружения.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Читает настройки через произвольный источник значений.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(value) = get("STATEMENT_DECIMAL_MARK") {
            config.parse.number_format = value.parse::<NumberFormat>().map_err(|value| {
                ConfigError::Invalid {
                    key: "STATEMENT_DECIMAL_MARK",
                    value,
                }
            })?;
        }
        if let Some(value) = get("STATEMENT_UTC_OFFSET") {
            config.parse.utc_offset = parse_offset(&value).ok_or(ConfigError::Invalid {
                key: "STATEMENT_UTC_OFFSET",
                value,
            })?;
        }
        if let Some(value) = get("STATEMENT_DELIMITER") {
            config.parse.delimiter = Some(parse_delimiter(&value).ok_or(ConfigError::Invalid {
                key: "STATEMENT_DELIMITER",
                value,
            })?);
        }
        if let Some(value) = get("STATEMENT_FORMAT") {
            config.parse.format = Some(value.parse::<StatementFormat>().map_err(|_| {
                ConfigError::Invalid {
                    key: "STATEMENT_FORMAT",
                    value,
                }
            })?);
        }
        if let Some(value) = get("STATEMENT_ENCODING") {
            config.encoding =
                Encoding::for_label(value.as_bytes()).ok_or(ConfigError::Invalid {
                    key: "STATEMENT_ENCODING",
                    value,
                })?;
        }

        config.notion = match (get("NOTION_API_KEY"), get("NOTION_DATABASE_ID")) {
            (Some(api_key), Some(database_id)) => Some(NotionConfig {
                api_key,
                database_id,
            }),
            (None, None) => None,
            _ => return Err(ConfigError::Incomplete("NOTION_API_KEY and NOTION_DATABASE_ID")),
        };
        if get("GOOGLE_SHEETS_ENABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            let spreadsheet_id = get("GOOGLE_SHEETS_SPREADSHEET_ID").ok_or(
                ConfigError::Incomplete("GOOGLE_SHEETS_ENABLED and GOOGLE_SHEETS_SPREADSHEET_ID"),
            )?;
            config.sheets = Some(SheetsConfig {
                credentials_file: get("GOOGLE_SHEETS_CREDENTIALS_FILE")
                    .map_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE), PathBuf::from),
                spreadsheet_id,
            });
        }
        config.journal_path = get("JOURNAL_PATH").map(PathBuf::from);
        Ok(config)
    }

    /// Хранилища в порядке: журнал, Notion, Google Sheets.
    pub fn stores(&self) -> Result<Vec<Arc<dyn TradeStore>>, StoreError> {
        let mut stores: Vec<Arc<dyn TradeStore>> = Vec::new();
        if let Some(path) = &self.journal_path {
            stores.push(Arc::new(JournalStore::new(path)));
        }
        if let Some(notion) = &self.notion {
            stores.push(Arc::new(NotionStore::new(
                notion.api_key.clone(),
                notion.database_id.clone(),
            )?));
        }
        if let Some(sheets) = &self.sheets {
            stores.push(Arc::new(SheetsStore::new(
                &sheets.credentials_file,
                sheets.spreadsheet_id.clone(),
            )?));
        }
        Ok(stores)
    }
}

/// `+09:00`, `+0900`, `-5`, `UTC+3`.
fn parse_offset(value: &str) -> Option<FixedOffset> {
    let caps = OFFSET_RE.captures(value)?;
    let hours: i32 = caps[2].parse().ok()?;
    let minutes: i32 = caps.get(3).map_or(Ok(0), |m| m.as_str().parse()).ok()?;
    if minutes >= 60 {
        return None;
    }
    let secs = (hours * 3600 + minutes * 60) * if &caps[1] == "-" { -1 } else { 1 };
    FixedOffset::east_opt(secs)
}

fn parse_delimiter(value: &str) -> Option<u8> {
    match value {
        "tab" | "\\t" => Some(b'\t'),
        "comma" => Some(b','),
        "semicolon" => Some(b';'),
        _ => match value.as_bytes() {
            [byte] if byte.is_ascii_punctuation() => Some(*byte),
            _ => None,
        },
    }
}
