//! Хранилище в таблице Google Sheets: одна строка на сделку.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use yup_oauth2::ServiceAccountAuthenticator;
use yup_oauth2::authenticator::DefaultAuthenticator;

use super::TradeStore;
use crate::error::{StoreError, is_permanent_status};
use crate::types::{Money, StoreSnapshot, Ticket, TradeRecord};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4";
const SCOPES: &[&str] = &["https://www.googleapis.com/auth/spreadsheets"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Столбцы листа. Тикет всегда в столбце A.
const HEADERS: [&str; 14] = [
    "取引番号",
    "通貨ペア",
    "タイプ",
    "ロット",
    "開始時刻",
    "終了時刻",
    "日付",
    "損益",
    "pips",
    "保有時間(秒)",
    "手数料",
    "スワップ",
    "合計損益",
    "同期日時",
];
const TICKET_COLUMN: &str = "A:A";
const ROW_RANGE: &str = "A1:N1";

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

/// Таблица Google Sheets с доступом по ключу сервисного аккаунта.
///
/// Ключ читается и обменивается на токен при первом обращении, поэтому
/// ошибка ключа делает недоступной только эту таблицу.
pub struct SheetsStore {
    client: reqwest::Client,
    credentials_file: PathBuf,
    spreadsheet_id: String,
    base_url: String,
    auth: OnceCell<DefaultAuthenticator>,
}

impl SheetsStore {
    /// Таблица `spreadsheet_id`, ключ сервисного аккаунта в `credentials_file`.
    pub fn new<P: AsRef<Path>>(
        credentials_file: P,
        spreadsheet_id: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            credentials_file: credentials_file.as_ref().to_path_buf(),
            spreadsheet_id: spreadsheet_id.into(),
            base_url: SHEETS_API.to_string(),
            auth: OnceCell::new(),
        })
    }

    /// Другой адрес API, например локальный стенд.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn authenticator(&self) -> Result<&DefaultAuthenticator, StoreError> {
        self.auth
            .get_or_try_init(|| async {
                let key = yup_oauth2::read_service_account_key(&self.credentials_file)
                    .await
                    .map_err(|err| {
                        StoreError::permanent(format!(
                            "service account key {}: {err}",
                            self.credentials_file.display()
                        ))
                    })?;
                ServiceAccountAuthenticator::builder(key)
                    .build()
                    .await
                    .map_err(|err| StoreError::permanent(format!("google auth: {err}")))
            })
            .await
    }

    async fn access_token(&self) -> Result<String, StoreError> {
        let token = self
            .authenticator()
            .await?
            .token(SCOPES)
            .await
            .map_err(|err| StoreError::transient(format!("google token: {err}")))?;
        token
            .token()
            .map(str::to_string)
            .ok_or_else(|| StoreError::permanent("google token: empty access token"))
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{range}",
            self.base_url, self.spreadsheet_id
        )
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StoreError> {
        let response = request.bearer_auth(self.access_token().await?).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = format!("sheets: HTTP {status}: {}", text.trim());
        Err(if is_permanent_status(status) {
            StoreError::permanent(message)
        } else {
            StoreError::transient(message)
        })
    }

    async fn write_header(&self) -> Result<(), StoreError> {
        let request = self
            .client
            .put(self.values_url(ROW_RANGE))
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": [HEADERS] }));
        self.send(request).await?;
        info!(spreadsheet = %self.spreadsheet_id, "sheet header written");
        Ok(())
    }
}

#[async_trait]
impl TradeStore for SheetsStore {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn query_known_tickets(&self) -> Result<StoreSnapshot, StoreError> {
        let request = self
            .client
            .get(self.values_url(TICKET_COLUMN))
            .query(&[("majorDimension", "COLUMNS")]);
        let range: ValueRange = self.send(request).await?.json().await?;
        if range.values.is_empty() {
            self.write_header().await?;
        }
        let snapshot = tickets_from_column(&range);
        debug!(tickets = snapshot.len(), "sheet tickets loaded");
        Ok(snapshot)
    }

    async fn create_record(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let request = self
            .client
            .post(format!("{}:append", self.values_url(ROW_RANGE)))
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [row_values(record, Utc::now())] }));
        self.send(request).await?;
        Ok(())
    }
}

/// Тикеты из столбца A без строки заголовка и пустых ячеек.
fn tickets_from_column(range: &ValueRange) -> StoreSnapshot {
    range
        .values
        .first()
        .into_iter()
        .flatten()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty() && *cell != HEADERS[0])
        .map(Ticket::from)
        .collect()
}

fn decimal_cell(value: Option<Money>) -> Value {
    value.map_or_else(|| Value::String(String::new()), |v| Value::String(v.to_string()))
}

/// Строка листа в порядке `HEADERS`. Числа передаются строками, таблица
/// разбирает их сама.
fn row_values(record: &TradeRecord, synced_at: DateTime<Utc>) -> Vec<Value> {
    let close = record
        .close_time
        .map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_default();
    vec![
        json!(record.ticket.as_str()),
        json!(record.symbol),
        json!(record.side.to_string()),
        decimal_cell(Some(record.volume)),
        json!(record.open_time.format(TIME_FORMAT).to_string()),
        json!(close),
        json!(record.open_time.date_naive().to_string()),
        decimal_cell(Some(record.profit)),
        decimal_cell(record.pips()),
        record
            .holding_time()
            .map_or_else(|| json!(""), |d| json!(d.num_seconds())),
        decimal_cell(record.commission),
        decimal_cell(record.swap),
        decimal_cell(Some(record.net_profit())),
        json!(synced_at.format(TIME_FORMAT).to_string()),
    ]
}
