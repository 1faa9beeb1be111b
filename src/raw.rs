//! Исходный текст выписки, его кодировка и формат.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use encoding_rs::{Encoding, SHIFT_JIS};
use scraper::Html;

use crate::error::StatementError;

/// Представление выписки.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementFormat {
    /// HTML-отчёт («Detailed Statement» / «Report» из MT5).
    Markup,
    /// Табличный CSV-экспорт.
    Delimited,
}

impl StatementFormat {
    /// Формат по расширению файла.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "html" | "htm" => Some(Self::Markup),
            "csv" | "txt" => Some(Self::Delimited),
            _ => None,
        }
    }

    /// Угадывает формат по содержимому.
    pub fn sniff(content: &str) -> Self {
        let head: String = content
            .chars()
            .take(4096)
            .collect::<String>()
            .to_ascii_lowercase();
        if head.contains("<html") || head.contains("<table") || head.contains("<!doctype") {
            Self::Markup
        } else {
            Self::Delimited
        }
    }
}

impl FromStr for StatementFormat {
    type Err = StatementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" | "htm" | "markup" => Ok(Self::Markup),
            "csv" | "delimited" => Ok(Self::Delimited),
            other => Err(StatementError::UnknownFormat(other.to_string())),
        }
    }
}

impl fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Markup => "html",
            Self::Delimited => "csv",
        })
    }
}

/// Исходный текст выписки без разбора.
#[derive(Debug, Clone)]
pub struct RawStatement {
    /// Декодированное содержимое файла.
    pub content: String,
    /// Представление.
    pub format: StatementFormat,
}

impl RawStatement {
    /// Читает выписку из произвольного `Read`, определяя кодировку и формат.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, StatementError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self::from_bytes(&bytes, SHIFT_JIS))
    }

    /// Читает файл; формат берётся из расширения, иначе по содержимому.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, StatementError> {
        Self::from_path_with_encoding(path, SHIFT_JIS)
    }

    /// То же, что [`RawStatement::from_path`], с заданной региональной кодировкой.
    pub fn from_path_with_encoding<P: AsRef<Path>>(
        path: P,
        fallback: &'static Encoding,
    ) -> Result<Self, StatementError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let raw = Self::from_bytes(&bytes, fallback);
        Ok(match StatementFormat::from_path(path) {
            Some(format) => raw.with_format(format),
            None => raw,
        })
    }

    /// Декодирует байты: BOM UTF-8/UTF-16 (MT5 сохраняет HTML в UTF-16LE),
    /// затем UTF-8, затем региональная кодировка брокера.
    pub fn from_bytes(bytes: &[u8], fallback: &'static Encoding) -> Self {
        let content = if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
            let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
            text.into_owned()
        } else if let Ok(text) = std::str::from_utf8(bytes) {
            text.to_string()
        } else {
            let (text, _, _) = fallback.decode(bytes);
            text.into_owned()
        };
        let format = StatementFormat::sniff(&content);
        Self { content, format }
    }

    /// Создаёт выписку из готовой строки, формат определяется по содержимому.
    #[inline]
    pub fn from_str(s: &str) -> Self {
        Self {
            content: s.to_string(),
            format: StatementFormat::sniff(s),
        }
    }

    /// Явно задаёт формат.
    #[inline]
    #[must_use]
    pub const fn with_format(mut self, format: StatementFormat) -> Self {
        self.format = format;
        self
    }
}

/// Разобранный DOM HTML-выписки.
#[derive(Debug, Clone)]
pub struct DomStatement {
    pub(crate) doc: Html,
}

impl DomStatement {
    /// Парсит DOM из исходного HTML.
    #[inline]
    pub fn parse(raw: &RawStatement) -> Self {
        Self {
            doc: Html::parse_document(&raw.content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16le_with_bom() {
        let text = "<html><table><tr><td>Positions</td></tr></table></html>";
        let mut bytes = vec![0xFF, 0xFE];
        bytes.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        let raw = RawStatement::from_bytes(&bytes, SHIFT_JIS);
        assert_eq!(raw.content, text);
        assert_eq!(raw.format, StatementFormat::Markup);
    }

    #[test]
    fn falls_back_to_regional_encoding() {
        let (bytes, _, _) = SHIFT_JIS.encode("チケット,シンボル\n1001,EURUSD\n");
        let raw = RawStatement::from_bytes(&bytes, SHIFT_JIS);
        assert!(raw.content.starts_with("チケット"));
        assert_eq!(raw.format, StatementFormat::Delimited);
    }

    #[test]
    fn format_from_extension_and_name() {
        assert_eq!(
            StatementFormat::from_path(Path::new("reports/ReportHistory.HTM")),
            Some(StatementFormat::Markup)
        );
        assert_eq!(
            StatementFormat::from_path(Path::new("deals.csv")),
            Some(StatementFormat::Delimited)
        );
        assert_eq!(StatementFormat::from_path(Path::new("deals.xlsx")), None);
        assert_eq!("CSV".parse::<StatementFormat>().unwrap(), StatementFormat::Delimited);
        assert!("pdf".parse::<StatementFormat>().is_err());
    }
}
