//! Хранилище в базе данных Notion.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::TradeStore;
use crate::error::{StoreError, is_permanent_status};
use crate::types::{Money, Side, StoreSnapshot, StoredTrade, Ticket, TradeRecord};

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// Схема базы сделок: заголовок-тикет и поля журнала.
const TICKET_PROP: &str = "取引番号";
const SYMBOL_PROP: &str = "通貨ペア";
const SIDE_PROP: &str = "タイプ";
const VOLUME_PROP: &str = "ロット";
const DATE_PROP: &str = "日付";
const NET_PROFIT_PROP: &str = "損益 from HTML";
const PIPS_PROP: &str = "pips from HTML";
/// Время удержания в секундах.
const HOLDING_PROP: &str = "保有時間";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<PageObject>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageObject {
    properties: HashMap<String, Value>,
}

/// База данных Notion: одна страница на сделку, тикет в заголовке.
#[derive(Debug, Clone)]
pub struct NotionStore {
    client: reqwest::Client,
    api_key: String,
    database_id: String,
    base_url: String,
}

impl NotionStore {
    /// Клиент для базы `database_id` с интеграционным ключом `api_key`.
    pub fn new(
        api_key: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            database_id: database_id.into(),
            base_url: NOTION_API.to_string(),
        })
    }

    /// Другой адрес API, например локальный стенд.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, StoreError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = format!("{path}: HTTP {status}: {}", text.trim());
        Err(if is_permanent_status(status) {
            StoreError::permanent(message)
        } else {
            StoreError::transient(message)
        })
    }
}

#[async_trait]
impl TradeStore for NotionStore {
    fn name(&self) -> &str {
        "notion"
    }

    async fn query_known_tickets(&self) -> Result<StoreSnapshot, StoreError> {
        let path = format!("databases/{}/query", self.database_id);
        let mut snapshot = StoreSnapshot::new();
        let mut cursor: Option<String> = None;
        loop {
            let response: QueryResponse = self
                .post(&path, &query_body(cursor.as_deref()))
                .await?
                .json()
                .await?;
            debug!(pages = response.results.len(), "notion query page");

            for page in &response.results {
                if let Some((ticket, stored)) = stored_from_properties(&page.properties) {
                    snapshot.insert_stored(ticket, stored);
                }
            }
            match (response.has_more, response.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(snapshot)
    }

    async fn create_record(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": page_properties(record),
        });
        self.post("pages", &body).await?;
        Ok(())
    }
}

fn query_body(cursor: Option<&str>) -> Value {
    let mut body = json!({ "page_size": PAGE_SIZE });
    if let Some(cursor) = cursor {
        body["start_cursor"] = Value::String(cursor.to_string());
    }
    body
}

fn number(value: Option<Money>) -> Value {
    json!({ "number": value.and_then(|v| v.to_f64()) })
}

/// Свойства страницы для одной сделки. Дата записывается по дню открытия
/// во времени отчёта, прибыль включает своп и комиссию.
fn page_properties(record: &TradeRecord) -> Value {
    let mut props = serde_json::Map::new();
    props.insert(
        TICKET_PROP.into(),
        json!({ "title": [{ "text": { "content": record.ticket.as_str() } }] }),
    );
    props.insert(SYMBOL_PROP.into(), json!({ "select": { "name": record.symbol } }));
    props.insert(
        SIDE_PROP.into(),
        json!({ "select": { "name": record.side.to_string() } }),
    );
    props.insert(VOLUME_PROP.into(), number(Some(record.volume)));
    props.insert(
        DATE_PROP.into(),
        json!({ "date": { "start": record.open_time.date_naive().to_string() } }),
    );
    props.insert(NET_PROFIT_PROP.into(), number(Some(record.net_profit())));
    props.insert(PIPS_PROP.into(), number(record.pips()));
    props.insert(
        HOLDING_PROP.into(),
        json!({ "number": record.holding_time().map(|d| d.num_seconds()) }),
    );
    Value::Object(props)
}

fn plain_text(prop: &Value, kind: &str) -> Option<String> {
    let text: String = prop
        .get(kind)?
        .as_array()?
        .iter()
        .filter_map(|part| {
            part.get("plain_text")
                .or_else(|| part.get("text")?.get("content"))
                .and_then(Value::as_str)
        })
        .collect();
    (!text.is_empty()).then_some(text)
}

fn select_name(prop: &Value) -> Option<&str> {
    prop.get("select")?.get("name")?.as_str()
}

fn decimal(prop: &Value) -> Option<Decimal> {
    let Value::Number(number) = prop.get("number")? else {
        return None;
    };
    let number = number.to_string();
    Decimal::from_str(&number)
        .or_else(|_| Decimal::from_scientific(&number))
        .ok()
}

/// Тикет и сохранённые поля страницы. Страница без заголовка пропускается.
fn stored_from_properties(props: &HashMap<String, Value>) -> Option<(Ticket, StoredTrade)> {
    let ticket = plain_text(props.get(TICKET_PROP)?, "title")?;
    let side = props
        .get(SIDE_PROP)
        .and_then(select_name)
        .and_then(|name| match name.to_ascii_lowercase().as_str() {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        });
    let stored = StoredTrade {
        symbol: props.get(SYMBOL_PROP).and_then(select_name).map(str::to_string),
        side,
        volume: props.get(VOLUME_PROP).and_then(decimal),
        profit: None,
        net_profit: props.get(NET_PROFIT_PROP).and_then(decimal),
    };
    Some((Ticket(ticket.trim().to_string()), stored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    fn trade() -> TradeRecord {
        let tz = FixedOffset::east_opt(9 * 3600).unwrap();
        TradeRecord {
            ticket: Ticket::from("50012"),
            symbol: "USDJPY".to_string(),
            side: Side::Buy,
            volume: Decimal::new(10, 2),
            open_time: tz.with_ymd_and_hms(2024, 5, 10, 14, 0, 0).unwrap(),
            close_time: Some(tz.with_ymd_and_hms(2024, 5, 10, 16, 30, 0).unwrap()),
            open_price: Some(Decimal::new(155_200, 3)),
            close_price: Some(Decimal::new(155_450, 3)),
            profit: Decimal::new(250, 0),
            swap: Some(Decimal::new(-5, 0)),
            commission: None,
            comment: None,
        }
    }

    #[test]
    fn page_properties_carry_trade_fields() {
        let props = page_properties(&trade());
        assert_eq!(props[TICKET_PROP]["title"][0]["text"]["content"], "50012");
        assert_eq!(props[SYMBOL_PROP]["select"]["name"], "USDJPY");
        assert_eq!(props[SIDE_PROP]["select"]["name"], "buy");
        assert_eq!(props[VOLUME_PROP]["number"], 0.1);
        assert_eq!(props[NET_PROFIT_PROP]["number"], 245.0);
        assert_eq!(props[PIPS_PROP]["number"], 25.0);
        assert_eq!(props[HOLDING_PROP]["number"], 9000);
        assert_eq!(props[DATE_PROP]["date"]["start"], "2024-05-10");
        assert_eq!(props.as_object().unwrap().len(), 8);
    }

    #[test]
    fn query_body_adds_cursor_only_when_paging() {
        assert_eq!(query_body(None), json!({ "page_size": 100 }));
        assert_eq!(
            query_body(Some("abc")),
            json!({ "page_size": 100, "start_cursor": "abc" })
        );
    }

    #[test]
    fn stored_fields_read_back_from_page() {
        let page: PageObject = serde_json::from_value(json!({
            "properties": {
                "取引番号": { "title": [{ "text": { "content": "50012" } }] },
                "通貨ペア": { "select": { "name": "USDJPY" } },
                "タイプ": { "select": { "name": "SELL" } },
                "ロット": { "number": 0.1 },
                "日付": { "date": { "start": "2024-05-10" } },
                "損益 from HTML": { "number": 12.34 },
                "pips from HTML": { "number": 25.0 },
                "保有時間": { "number": 9000 }
            }
        }))
        .unwrap();
        let (ticket, stored) = stored_from_properties(&page.properties).unwrap();
        assert_eq!(ticket, Ticket::from("50012"));
        assert_eq!(stored.symbol.as_deref(), Some("USDJPY"));
        assert_eq!(stored.side, Some(Side::Sell));
        assert_eq!(stored.volume, Some(Decimal::new(1, 1)));
        assert_eq!(stored.profit, None);
        assert_eq!(stored.net_profit, Some(Decimal::new(1234, 2)));
    }

    #[test]
    fn page_without_title_is_ignored() {
        let page: PageObject = serde_json::from_value(json!({
            "properties": { "取引番号": { "title": [] } }
        }))
        .unwrap();
        assert!(stored_from_properties(&page.properties).is_none());

        let foreign: PageObject = serde_json::from_value(json!({
            "properties": { "Name": { "title": [{ "plain_text": "50012" }] } }
        }))
        .unwrap();
        assert!(stored_from_properties(&foreign.properties).is_none());
    }
}
