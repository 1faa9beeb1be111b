//! Набор выписок из каталога и объединение их сделок.

use std::collections::BTreeMap;
use std::fs::{self, DirEntry};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use encoding_rs::{Encoding, SHIFT_JIS};
use tracing::warn;

use crate::error::StatementError;
use crate::raw::{RawStatement, StatementFormat};
use crate::statement::{ParseOptions, Statement};
use crate::types::{Ticket, TradeRecord};

/// Выписка вместе с путём к файлу.
#[derive(Debug, Clone)]
pub struct LoadedStatement {
    /// Путь к файлу.
    pub path: PathBuf,
    /// Результат разбора.
    pub statement: Statement,
}

/// Набор выписок. Файл, который не удалось разобрать, не мешает остальным.
#[derive(Debug, Default)]
pub struct StatementSet {
    /// Разобранные выписки в порядке имён файлов.
    pub statements: Vec<LoadedStatement>,
    /// Файлы с фатальной ошибкой разбора.
    pub failures: Vec<(PathBuf, StatementError)>,
}

fn is_statement_file(path: &Path) -> bool {
    path.is_file() && StatementFormat::from_path(path).is_some()
}

fn statement_files(dir: &Path) -> Result<Vec<PathBuf>, StatementError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?
        .filter_map(std::result::Result::ok)
        .collect();
    // Порядок файлов детерминирован.
    entries.sort_by_key(DirEntry::path);
    Ok(entries
        .iter()
        .map(DirEntry::path)
        .filter(|p| is_statement_file(p))
        .collect())
}

impl StatementSet {
    /// Разбирает все выписки каталога с настройками по умолчанию.
    #[inline]
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self, StatementError> {
        Self::from_dir_with(dir, ParseOptions::default(), SHIFT_JIS)
    }

    /// Разбирает все выписки каталога с заданными настройками.
    ///
    /// Ошибкой завершается только чтение самого каталога.
    pub fn from_dir_with<P: AsRef<Path>>(
        dir: P,
        options: ParseOptions,
        fallback: &'static Encoding,
    ) -> Result<Self, StatementError> {
        let mut set = Self::default();
        for path in statement_files(dir.as_ref())? {
            let parsed = RawStatement::from_path_with_encoding(&path, fallback)
                .and_then(|raw| Statement::parse_with_options(&raw, options));
            match parsed {
                Ok(statement) => set.statements.push(LoadedStatement { path, statement }),
                Err(err) => {
                    warn!(path = %path.display(), "statement skipped: {err}");
                    set.failures.push((path, err));
                }
            }
        }
        Ok(set)
    }

    /// Сделки всех выписок, по одной на тикет. Более поздний файл перекрывает
    /// более ранний.
    pub fn merged_trades(&self) -> Vec<TradeRecord> {
        let mut map: BTreeMap<Ticket, TradeRecord> = BTreeMap::new();
        for loaded in &self.statements {
            for trade in &loaded.statement.trades {
                map.insert(trade.ticket.clone(), trade.clone());
            }
        }
        map.into_values().collect()
    }

    /// Сколько строк отброшено во всех выписках.
    pub fn rows_dropped(&self) -> usize {
        self.statements
            .iter()
            .map(|s| s.statement.rows_dropped)
            .sum()
    }
}

/// Самая свежая по времени изменения выписка каталога.
pub fn latest_statement<P: AsRef<Path>>(dir: P) -> Result<Option<PathBuf>, StatementError> {
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for path in statement_files(dir.as_ref())? {
        let modified = fs::metadata(&path)?.modified()?;
        if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
    }

    #[test]
    fn loads_every_fixture_in_name_order() {
        let set = StatementSet::from_dir(fixtures()).unwrap();
        assert!(set.failures.is_empty(), "{:?}", set.failures);
        assert!(set.statements.len() >= 2);

        let names: Vec<_> = set
            .statements
            .iter()
            .filter_map(|s| s.path.file_name())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(!set.merged_trades().is_empty());
    }

    #[test]
    fn latest_statement_is_some_for_fixture_dir() {
        let latest = latest_statement(fixtures()).unwrap().unwrap();
        assert!(is_statement_file(&latest));
    }

    #[test]
    fn missing_dir_is_an_error() {
        assert!(StatementSet::from_dir(fixtures().join("missing")).is_err());
    }
}
