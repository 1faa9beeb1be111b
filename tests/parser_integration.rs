use std::path::PathBuf;
use std::str::FromStr;

use mt5_statement_sync::{
    BalanceKind, NumberFormat, ParseWarning, RawStatement, Section, Side, Statement,
    StatementBuilder, StatementError, StatementSet, Ticket,
};
use rust_decimal::Decimal;

fn fixture(name: &str) -> PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn load_fixture(name: &str) -> Statement {
    let raw = RawStatement::from_path(fixture(name)).expect("read fixture");
    Statement::parse(&raw).expect("parse fixture")
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[test]
fn parses_mt5_history_report() {
    let statement = load_fixture("ReportHistory-5001234.html");

    let tickets: Vec<&str> = statement.trades.iter().map(|t| t.ticket.as_str()).collect();
    assert_eq!(tickets, vec!["2001", "3001", "1001", "1002"]);

    let eurusd = &statement.trades[2];
    assert_eq!(eurusd.symbol, "EURUSD");
    assert_eq!(eurusd.side, Side::Buy);
    assert_eq!(eurusd.volume, dec("0.10"));
    assert_eq!(eurusd.profit, dec("12.34"));
    assert_eq!(eurusd.commission, Some(dec("-0.70")));
    assert_eq!(eurusd.pips(), Some(dec("12.3")));
    assert_eq!(
        eurusd.open_time.to_rfc3339(),
        "2024-03-04T10:15:30+09:00"
    );

    let usdjpy = &statement.trades[3];
    assert_eq!(usdjpy.side, Side::Sell);
    assert_eq!(usdjpy.pips(), Some(dec("25")));

    let gold = &statement.trades[1];
    assert!(gold.is_open());
    assert_eq!(gold.open_price, Some(dec("2150.50")));
    assert_eq!(gold.comment.as_deref(), Some("grid #2"));

    assert_eq!(statement.open_positions().count(), 1);
    assert_eq!(statement.closed_trades().count(), 3);
}

#[test]
fn closed_deal_overrides_open_position() {
    let statement = load_fixture("ReportHistory-5001234.html");
    let versions: Vec<_> = statement
        .trades
        .iter()
        .filter(|t| t.ticket == Ticket::from("2001"))
        .collect();
    assert_eq!(versions.len(), 1);
    assert!(!versions[0].is_open());
    assert_eq!(versions[0].profit, dec("-15.00"));
}

#[test]
fn malformed_row_is_isolated() {
    let statement = load_fixture("ReportHistory-5001234.html");
    assert_eq!(statement.rows_dropped, 1);
    assert!(statement.trades.iter().all(|t| t.ticket.as_str() != "1003"));

    let malformed: Vec<_> = statement
        .warnings
        .iter()
        .filter_map(|w| match w {
            ParseWarning::MalformedRow { section, error, .. } => Some((*section, error)),
            _ => None,
        })
        .collect();
    assert_eq!(malformed.len(), 1);
    assert_eq!(malformed[0].0, Section::ClosedDeals);
    assert_eq!(malformed[0].1.token, "n/a");
}

#[test]
fn positions_totals_row_is_not_a_record() {
    let statement = load_fixture("ReportHistory-5001234.html");
    assert!(!statement.warnings.iter().any(|w| matches!(
        w,
        ParseWarning::MalformedRow { error, .. } if error.token.contains("4.55")
    )));
    assert!(statement.trades.iter().all(|t| t.profit != dec("34.10")));
}

#[test]
fn unknown_sections_are_warnings() {
    let statement = load_fixture("ReportHistory-5001234.html");
    assert!(statement.warnings.iter().any(|w| matches!(
        w,
        ParseWarning::UnrecognizedSection { heading } if heading == "Trade History Report"
    )));
}

#[test]
fn balance_operations_are_deduplicated() {
    let statement = load_fixture("ReportHistory-5001234.html");
    assert_eq!(statement.balance_events.len(), 2);
    assert_eq!(statement.balance_events[0].kind, BalanceKind::Deposit);
    assert_eq!(statement.balance_events[0].amount, dec("1000"));
    assert_eq!(statement.balance_events[1].kind, BalanceKind::Withdrawal);
    assert_eq!(statement.balance_events[1].amount, dec("-200"));
}

#[test]
fn balance_operations_can_be_disabled() {
    let raw = RawStatement::from_path(fixture("ReportHistory-5001234.html")).unwrap();
    let statement = StatementBuilder::new(&raw)
        .balance_operations(false)
        .parse()
        .unwrap();
    assert!(statement.balance_events.is_empty());
    assert_eq!(statement.trades.len(), 4);
}

#[test]
fn columns_are_matched_by_header_text() {
    let statement = load_fixture("single_closed_trade.html");
    assert_eq!(statement.trades.len(), 1);
    let trade = &statement.trades[0];
    assert_eq!(trade.ticket, Ticket::from("1001"));
    assert_eq!(trade.symbol, "EURUSD");
    assert_eq!(trade.volume, dec("0.10"));
    assert_eq!(trade.profit, dec("12.34"));
    assert_eq!(trade.holding_time().map(|d| d.num_minutes()), Some(135));
}

#[test]
fn parses_comma_decimal_csv() {
    let statement = load_fixture("statement_comma.csv");
    assert_eq!(statement.trades.len(), 3);
    assert_eq!(statement.trades[0].profit, dec("1234.56"));
    assert_eq!(statement.trades[0].open_price, Some(dec("163.250")));
    assert_eq!(statement.trades[1].net_profit(), dec("243"));
    assert_eq!(statement.balance_events.len(), 1);
    assert_eq!(statement.balance_events[0].amount, dec("10000"));
    assert_eq!(statement.rows_dropped, 0);
}

#[test]
fn parses_japanese_headers() {
    let statement = load_fixture("japanese_history.csv");
    assert_eq!(statement.trades.len(), 2);
    assert_eq!(statement.trades[0].symbol, "USDJPY");
    assert_eq!(statement.trades[0].side, Side::Buy);
    assert_eq!(statement.trades[1].side, Side::Sell);
    assert_eq!(statement.trades[1].pips(), Some(dec("30")));
}

#[test]
fn grouped_thousands_under_dot_decimal() {
    let raw = RawStatement::from_path(fixture("grouped_thousands.csv")).unwrap();
    let statement = StatementBuilder::new(&raw)
        .number_format(NumberFormat::DotDecimal)
        .parse()
        .unwrap();
    assert_eq!(statement.trades[0].profit, dec("1234.56"));
}

#[test]
fn grouped_thousands_under_comma_decimal_fails_fast() {
    let raw = RawStatement::from_path(fixture("grouped_thousands.csv")).unwrap();
    let err = StatementBuilder::new(&raw)
        .number_format(NumberFormat::CommaDecimal)
        .parse()
        .unwrap_err();
    assert!(matches!(
        err,
        StatementError::EmptySection {
            section: Section::ClosedDeals,
            dropped: 1
        }
    ));
}

#[test]
fn grouped_thousands_with_inferred_mark() {
    let statement = load_fixture("grouped_thousands.csv");
    assert_eq!(statement.trades[0].profit, dec("1234.56"));
}

#[test]
fn text_without_sections_is_rejected() {
    let raw = RawStatement::from_str("<html><body><p>nothing here</p></body></html>");
    assert!(matches!(
        Statement::parse(&raw),
        Err(StatementError::NoSections)
    ));
}

#[test]
fn parse_fixture_dir() {
    let set = StatementSet::from_dir(fixture("")).expect("parse fixtures");
    assert_eq!(set.statements.len(), 5);
    assert!(set.failures.is_empty());
    // 2001, 3001, 1001, 1002, 5001..5003, 7001, 7002, 9001
    assert_eq!(set.merged_trades().len(), 10);
}

#[test]
fn parse_real_dir_if_present() {
    if let Ok(dir) = std::env::var("REAL_STATEMENT_DIR") {
        let set = StatementSet::from_dir(&dir).expect("read statement dir");
        assert!(!set.statements.is_empty());
        assert!(set.failures.is_empty(), "{:?}", set.failures);
    }
}
