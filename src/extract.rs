//! Поиск разделов выписки в HTML и CSV и выдача сырых строк.
//!
//! Разделы распознаются по тексту заголовка, а не по позиции: генераторы
//! отчётов MT5 меняют порядок и набор столбцов между версиями.

use std::collections::VecDeque;
use std::fmt;
use std::sync::LazyLock;

use scraper::html::Select;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::raw::DomStatement;

/// Логический раздел выписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum Section {
    /// Открытые позиции.
    OpenPositions,
    /// Закрытые сделки (история позиций).
    ClosedDeals,
    /// Пополнения, выводы и корректировки.
    BalanceOperations,
    /// Итоги по счёту.
    Summary,
}

const OPEN_POSITION_HEADINGS: &[&str] = &[
    "open positions",
    "open trades",
    "オープンポジション",
    "保有ポジション",
];
const CLOSED_DEAL_HEADINGS: &[&str] = &[
    "closed transactions",
    "closed trades",
    "closed positions",
    "positions",
    "ポジション",
    "ポジション一覧",
    "決済済み取引",
];
const BALANCE_HEADINGS: &[&str] = &[
    "balance operations",
    "deposit/withdrawal",
    "deposits/withdrawals",
    "入出金",
];
const SUMMARY_HEADINGS: &[&str] = &["summary", "results", "結果", "サマリー"];

impl Section {
    /// Сопоставляет текст заголовка с известными разделами.
    pub fn from_heading(text: &str) -> Option<Self> {
        let key = heading_key(text);
        [
            (Self::OpenPositions, OPEN_POSITION_HEADINGS),
            (Self::ClosedDeals, CLOSED_DEAL_HEADINGS),
            (Self::BalanceOperations, BALANCE_HEADINGS),
            (Self::Summary, SUMMARY_HEADINGS),
        ]
        .into_iter()
        .find(|(_, aliases)| aliases.contains(&key.as_str()))
        .map(|(section, _)| section)
    }

    /// Определяет раздел CSV-блока без заголовка по названиям столбцов.
    pub fn infer_from_header(cells: &[String]) -> Self {
        let keys: Vec<String> = cells.iter().map(|c| heading_key(c)).collect();
        let has = |names: &[&str]| keys.iter().any(|k| names.contains(&k.as_str()));
        let repeated_time = keys.iter().filter(|k| k.as_str() == "time").count() > 1;

        if repeated_time || has(&["close time", "close price", "終了時刻", "決済時刻"]) {
            Self::ClosedDeals
        } else if has(&["amount", "金額"]) && !has(&["symbol", "シンボル", "通貨ペア"]) {
            Self::BalanceOperations
        } else {
            Self::OpenPositions
        }
    }

    /// Первая строка раздела после заголовка содержит названия столбцов.
    #[inline]
    pub const fn has_header_row(self) -> bool {
        !matches!(self, Self::Summary)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenPositions => "Open Positions",
            Self::ClosedDeals => "Closed Deals",
            Self::BalanceOperations => "Balance Operations",
            Self::Summary => "Summary",
        })
    }
}

/// Ключ для сравнения заголовков: нижний регистр, схлопнутые пробелы,
/// без завершающего двоеточия.
pub(crate) fn heading_key(text: &str) -> String {
    normalize_chars(text.chars())
        .trim_end_matches([':', '：'])
        .trim()
        .replace(" / ", "/")
        .to_lowercase()
}

/// Элемент, который выдаёт извлекатель разделов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    /// Начался распознанный раздел.
    Heading {
        /// Раздел.
        section: Section,
    },
    /// Строка названий столбцов текущего раздела.
    Header {
        /// Раздел.
        section: Section,
        /// Тексты ячеек.
        cells: Vec<String>,
    },
    /// Строка данных.
    Row {
        /// Раздел.
        section: Section,
        /// Номер строки в исходном файле (для CSV) или в документе (для HTML).
        line: usize,
        /// Тексты ячеек.
        cells: Vec<String>,
    },
    /// Строку не удалось прочитать как запись.
    Unreadable {
        /// Раздел.
        section: Section,
        /// Номер строки.
        line: usize,
        /// Причина.
        reason: String,
    },
    /// Нераспознанный заголовок: раздел пропускается целиком.
    Skipped {
        /// Исходный текст заголовка.
        heading: String,
    },
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Idle,
    Skipping,
    AwaitingHeader(Section),
    InBody(Section),
}

impl Cursor {
    const fn entering(section: Section) -> Self {
        if section.has_header_row() {
            Self::AwaitingHeader(section)
        } else {
            Self::InBody(section)
        }
    }
}

/// Однопроходный извлекатель разделов для любого из двух представлений.
pub enum SectionExtractor<'a> {
    /// HTML-отчёт.
    Markup(MarkupSections<'a>),
    /// CSV-отчёт.
    Delimited(DelimitedSections<'a>),
}

impl<'a> SectionExtractor<'a> {
    /// Извлекатель поверх разобранного DOM.
    #[inline]
    pub fn markup(dom: &'a DomStatement) -> Self {
        Self::Markup(MarkupSections::new(&dom.doc))
    }

    /// Извлекатель поверх CSV-текста. Без явного разделителя он определяется
    /// по первой строке, где он встречается.
    #[inline]
    pub fn delimited(content: &'a str, delimiter: Option<u8>) -> Self {
        Self::Delimited(DelimitedSections::new(content, delimiter))
    }
}

impl Iterator for SectionExtractor<'_> {
    type Item = Extracted;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Markup(inner) => inner.next(),
            Self::Delimited(inner) => inner.next(),
        }
    }
}

static NODE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, tr").expect("valid node selector"));
static CELL_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td, th").expect("valid cell selector"));

/// Разделы HTML-отчёта в порядке документа.
pub struct MarkupSections<'a> {
    nodes: Select<'a, 'static>,
    cursor: Cursor,
    line: usize,
}

impl<'a> MarkupSections<'a> {
    fn new(doc: &'a Html) -> Self {
        Self {
            nodes: doc.select(&NODE_SELECTOR),
            cursor: Cursor::Idle,
            line: 0,
        }
    }

    fn heading(&mut self, text: String) -> Extracted {
        match Section::from_heading(&text) {
            Some(section) => {
                self.cursor = Cursor::entering(section);
                Extracted::Heading { section }
            }
            None => {
                warn!(heading = %text, "skipping unrecognized statement section");
                self.cursor = Cursor::Skipping;
                Extracted::Skipped { heading: text }
            }
        }
    }
}

impl Iterator for MarkupSections<'_> {
    type Item = Extracted;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.nodes.next()?;
            if node.value().name() != "tr" {
                let text = collect_text(node);
                if text.is_empty() {
                    continue;
                }
                return Some(self.heading(text));
            }

            self.line += 1;
            let cells: Vec<ElementRef> = node
                .select(&CELL_SELECTOR)
                .filter(|cell| !cell.value().classes().any(|c| c == "hidden"))
                .collect();
            let texts: Vec<String> = cells.iter().copied().flat_map(spanned_text).collect();
            if texts.iter().all(String::is_empty) {
                continue;
            }
            if let [only] = cells.as_slice() {
                if is_spanning_heading(*only) {
                    return Some(self.heading(texts.into_iter().next().unwrap_or_default()));
                }
            }

            match self.cursor {
                Cursor::Idle | Cursor::Skipping => {}
                Cursor::AwaitingHeader(section) => {
                    self.cursor = Cursor::InBody(section);
                    return Some(Extracted::Header {
                        section,
                        cells: texts,
                    });
                }
                Cursor::InBody(section) => {
                    return Some(Extracted::Row {
                        section,
                        line: self.line,
                        cells: texts,
                    });
                }
            }
        }
    }
}

/// Одиночная ячейка-заголовок: `th` или ячейка, растянутая на несколько столбцов.
fn is_spanning_heading(cell: ElementRef) -> bool {
    cell.value().name() == "th" || column_span(cell) > 1
}

/// Значение `colspan`, по правилам HTML не больше 1000.
fn column_span(cell: ElementRef) -> usize {
    cell.value()
        .attr("colspan")
        .and_then(|span| span.trim().parse::<usize>().ok())
        .filter(|span| *span > 0)
        .map_or(1, |span| span.min(1000))
}

/// Текст ячейки и по пустому слоту на каждый дополнительный столбец:
/// индексы столбцов строки данных совпадают с индексами заголовка.
fn spanned_text(cell: ElementRef) -> impl Iterator<Item = String> {
    let span = column_span(cell);
    std::iter::once(collect_text(cell)).chain(std::iter::repeat_n(String::new(), span - 1))
}

/// Разделы CSV-отчёта: блоки строк, разделённые пустыми строками.
pub struct DelimitedSections<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    delimiter: u8,
    queue: VecDeque<Extracted>,
}

impl<'a> DelimitedSections<'a> {
    fn new(content: &'a str, delimiter: Option<u8>) -> Self {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(content));
        Self {
            lines: content.lines().enumerate(),
            delimiter,
            queue: VecDeque::new(),
        }
    }

    /// Следующий блок непустых строк и номер его первой строки (с единицы).
    fn next_block(&mut self) -> Option<(usize, String)> {
        let mut start = None;
        let mut block = String::new();
        for (idx, line) in self.lines.by_ref() {
            if line.trim().is_empty() {
                if start.is_some() {
                    break;
                }
                continue;
            }
            start.get_or_insert(idx + 1);
            block.push_str(line);
            block.push('\n');
        }
        start.map(|s| (s, block))
    }

    fn read_block(&mut self, start: usize, block: &str) {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(block.as_bytes());

        let mut cursor = Cursor::Idle;
        for (idx, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(err) => {
                    let line = start + err.position().map_or(idx, |p| record_line(p, idx));
                    if let Cursor::InBody(section) | Cursor::AwaitingHeader(section) = cursor {
                        self.queue.push_back(Extracted::Unreadable {
                            section,
                            line,
                            reason: err.to_string(),
                        });
                    }
                    continue;
                }
            };
            let line = start + record.position().map_or(idx, |p| record_line(p, idx));
            let cells: Vec<String> = record.iter().map(|c| normalize_chars(c.chars())).collect();
            if cells.iter().all(String::is_empty) {
                continue;
            }

            if matches!(cursor, Cursor::Idle) {
                let mut non_empty = cells.iter().filter(|c| !c.is_empty());
                if let (Some(heading), None) = (non_empty.next(), non_empty.next()) {
                    match Section::from_heading(heading) {
                        Some(section) => {
                            cursor = Cursor::entering(section);
                            self.queue.push_back(Extracted::Heading { section });
                        }
                        None => {
                            warn!(
                                heading = %heading,
                                line,
                                "skipping unrecognized statement section"
                            );
                            self.queue.push_back(Extracted::Skipped {
                                heading: heading.clone(),
                            });
                            return;
                        }
                    }
                    continue;
                }
                let section = Section::infer_from_header(&cells);
                self.queue.push_back(Extracted::Heading { section });
                cursor = Cursor::entering(section);
            }

            match cursor {
                Cursor::Idle | Cursor::Skipping => {}
                Cursor::AwaitingHeader(section) => {
                    cursor = Cursor::InBody(section);
                    self.queue.push_back(Extracted::Header { section, cells });
                }
                Cursor::InBody(section) => {
                    self.queue.push_back(Extracted::Row {
                        section,
                        line,
                        cells,
                    });
                }
            }
        }
    }
}

/// Смещение строки записи внутри блока; `csv` считает строки с единицы.
fn record_line(position: &csv::Position, fallback: usize) -> usize {
    usize::try_from(position.line()).map_or(fallback, |line| line.saturating_sub(1))
}

impl Iterator for DelimitedSections<'_> {
    type Item = Extracted;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(item);
            }
            let (start, block) = self.next_block()?;
            self.read_block(start, &block);
        }
    }
}

/// Выбирает разделитель по первой строке, где он встречается: `;`,
/// табуляция или `,`. Строки-заголовки разделов без разделителей пропускаются.
fn detect_delimiter(content: &str) -> u8 {
    let first = content
        .lines()
        .find(|line| line.contains([';', '\t', ',']))
        .unwrap_or_default();
    let count = |ch: char| first.matches(ch).count();
    let (commas, semicolons, tabs) = (count(','), count(';'), count('\t'));
    if semicolons > commas && semicolons >= tabs {
        b';'
    } else if tabs > commas {
        b'\t'
    } else {
        b','
    }
}

/// Нормализует последовательность символов, схлопывая группы пробельных.
fn normalize_chars<I: IntoIterator<Item = char>>(iter: I) -> String {
    let mut output = String::new();
    let mut prev_space = false;
    for ch in iter {
        let is_space = ch.is_whitespace();
        if is_space {
            if !prev_space {
                output.push(' ');
            }
        } else {
            output.push(ch);
        }
        prev_space = is_space;
    }
    output.trim().to_string()
}

/// Собирает текст всех потомков элемента и нормализует пробелы.
pub(crate) fn collect_text(element: ElementRef) -> String {
    normalize_chars(element.text().flat_map(str::chars))
}
