//! Сопоставление столбцов раздела с каноническими полями по тексту заголовков.

use std::collections::HashMap;

use crate::extract::{Section, heading_key};

/// Каноническое поле строки раздела.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Field {
    Ticket,
    Symbol,
    Side,
    Volume,
    OpenTime,
    CloseTime,
    OpenPrice,
    ClosePrice,
    Commission,
    Swap,
    Profit,
    Comment,
    Time,
    Kind,
    Amount,
}

/// Вариант названия столбца. `occurrence` выбирает n-е вхождение повторяющегося
/// заголовка: MT5 печатает `Time` и `Price` дважды (открытие, затем закрытие).
#[derive(Debug, Clone, Copy)]
struct Alias {
    text: &'static str,
    occurrence: usize,
}

const fn alias(text: &'static str) -> Alias {
    Alias {
        text,
        occurrence: 0,
    }
}

const fn nth(text: &'static str, occurrence: usize) -> Alias {
    Alias { text, occurrence }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldSpec {
    field: Field,
    name: &'static str,
    required: bool,
    aliases: &'static [Alias],
}

const TICKET: &[Alias] = &[
    alias("ticket"),
    alias("position"),
    alias("order"),
    alias("deal"),
    alias("チケット"),
    alias("ポジション"),
    alias("注文"),
    alias("取引番号"),
];
const SYMBOL: &[Alias] = &[
    alias("symbol"),
    alias("シンボル"),
    alias("通貨ペア"),
    alias("銘柄"),
];
const SIDE: &[Alias] = &[alias("type"), alias("タイプ"), alias("種別"), alias("売買")];
const VOLUME: &[Alias] = &[
    alias("volume"),
    alias("lots"),
    alias("size"),
    alias("ロット"),
    alias("数量"),
    alias("取引数量"),
];
const OPEN_TIME: &[Alias] = &[
    alias("open time"),
    alias("time open"),
    alias("開始時刻"),
    alias("約定時刻"),
    nth("time", 0),
    nth("時間", 0),
];
const CLOSE_TIME: &[Alias] = &[
    alias("close time"),
    alias("time close"),
    alias("終了時刻"),
    alias("決済時刻"),
    nth("time", 1),
    nth("時間", 1),
];
const OPEN_PRICE: &[Alias] = &[
    alias("open price"),
    alias("price open"),
    alias("開始価格"),
    alias("約定価格"),
    nth("price", 0),
    nth("価格", 0),
];
const CLOSE_PRICE: &[Alias] = &[
    alias("close price"),
    alias("price close"),
    alias("終了価格"),
    alias("決済価格"),
    nth("price", 1),
    nth("価格", 1),
];
const COMMISSION: &[Alias] = &[alias("commission"), alias("fee"), alias("手数料")];
const SWAP: &[Alias] = &[alias("swap"), alias("スワップ")];
const PROFIT: &[Alias] = &[
    alias("profit"),
    alias("p&l"),
    alias("p/l"),
    alias("pnl"),
    alias("損益"),
    alias("利益"),
];
const COMMENT: &[Alias] = &[alias("comment"), alias("コメント")];
const TIME: &[Alias] = &[
    alias("time"),
    alias("date"),
    alias("日時"),
    alias("時刻"),
    alias("日付"),
];
const KIND: &[Alias] = &[alias("type"), alias("タイプ"), alias("種別")];
const AMOUNT: &[Alias] = &[
    alias("amount"),
    alias("profit"),
    alias("金額"),
    alias("損益"),
];

const fn spec(
    field: Field,
    name: &'static str,
    required: bool,
    aliases: &'static [Alias],
) -> FieldSpec {
    FieldSpec {
        field,
        name,
        required,
        aliases,
    }
}

const fn trade_fields(close_required: bool) -> [FieldSpec; 12] {
    [
        spec(Field::Ticket, "ticket", true, TICKET),
        spec(Field::Symbol, "symbol", true, SYMBOL),
        spec(Field::Side, "type", true, SIDE),
        spec(Field::Volume, "volume", true, VOLUME),
        spec(Field::OpenTime, "open time", true, OPEN_TIME),
        spec(Field::CloseTime, "close time", close_required, CLOSE_TIME),
        spec(Field::OpenPrice, "open price", false, OPEN_PRICE),
        spec(Field::ClosePrice, "close price", false, CLOSE_PRICE),
        spec(Field::Commission, "commission", false, COMMISSION),
        spec(Field::Swap, "swap", false, SWAP),
        spec(Field::Profit, "profit", true, PROFIT),
        spec(Field::Comment, "comment", false, COMMENT),
    ]
}

static OPEN_POSITION_FIELDS: [FieldSpec; 12] = trade_fields(false);
static CLOSED_DEAL_FIELDS: [FieldSpec; 12] = trade_fields(true);
static BALANCE_FIELDS: [FieldSpec; 4] = [
    spec(Field::Time, "time", true, TIME),
    spec(Field::Kind, "type", true, KIND),
    spec(Field::Amount, "amount", true, AMOUNT),
    spec(Field::Comment, "comment", false, COMMENT),
];

/// Набор полей раздела. Итоги (`Summary`) в записи не превращаются.
pub(crate) fn fields_for(section: Section) -> Option<&'static [FieldSpec]> {
    match section {
        Section::OpenPositions => Some(&OPEN_POSITION_FIELDS),
        Section::ClosedDeals => Some(&CLOSED_DEAL_FIELDS),
        Section::BalanceOperations => Some(&BALANCE_FIELDS),
        Section::Summary => None,
    }
}

/// Индексы столбцов конкретного экземпляра раздела.
#[derive(Debug, Clone, Default)]
pub(crate) struct ColumnMap {
    columns: HashMap<Field, usize>,
}

impl ColumnMap {
    /// Сопоставляет поля с ячейками строки заголовков. Возвращает имена
    /// обязательных полей, для которых столбец не найден.
    pub(crate) fn resolve(
        fields: &[FieldSpec],
        header: &[String],
    ) -> Result<Self, Vec<&'static str>> {
        let keys: Vec<String> = header.iter().map(|cell| heading_key(cell)).collect();
        let mut columns = HashMap::new();
        let mut missing = Vec::new();

        for spec in fields {
            let found = spec.aliases.iter().find_map(|alias| {
                keys.iter()
                    .enumerate()
                    .filter(|(_, key)| key.as_str() == alias.text)
                    .nth(alias.occurrence)
                    .map(|(idx, _)| idx)
            });
            match found {
                Some(idx) => {
                    columns.insert(spec.field, idx);
                }
                None if spec.required => missing.push(spec.name),
                None => {}
            }
        }

        if missing.is_empty() {
            Ok(Self { columns })
        } else {
            Err(missing)
        }
    }

    /// Текст ячейки поля, если столбец есть и строка достаточно длинная.
    pub(crate) fn cell<'r>(&self, row: &'r [String], field: Field) -> Option<&'r str> {
        let idx = *self.columns.get(&field)?;
        row.get(idx).map(String::as_str)
    }
}
