//! Tests for logging configuration and format parsing

use edge_ingest::observability::logging::{parse_level, LogFormat};
use edge_ingest::observability::{ingest_span, init_logging, session_span};
use tracing::Level;

#[test]
fn test_log_format_parse() {
    assert!(matches!(LogFormat::parse("json"), LogFormat::Json));
    assert!(matches!(LogFormat::parse("PRETTY"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse(" compact\n"), LogFormat::Compact));
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    assert!(matches!(LogFormat::parse(""), LogFormat::Json));
    assert!(matches!(LogFormat::parse("xml"), LogFormat::Json));
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level(" WARN "), Level::WARN);
    assert_eq!(parse_level("trace"), Level::TRACE);
    assert_eq!(parse_level("verbose"), Level::INFO);
}

#[test]
fn test_init_logging_twice_is_harmless() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);
    init_logging(Level::INFO, LogFormat::Json, true);

    let session = session_span!(node_id = "edge-01", broker = "broker.test:8883");
    let _entered = session.enter();
    let ingest = ingest_span!(topic = "/average");
    ingest.in_scope(|| tracing::debug!("inside ingest span"));
}
