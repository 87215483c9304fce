//! Unit tests for `AppError` display text and conversions.

use std::io;

use cai_acp_proxy::AppError;

/// Each variant renders with its prefix.
#[test]
fn display_prefixes() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::InvalidArgument("x".into()), "invalid argument: x"),
        (AppError::InvalidOperation("x".into()), "invalid operation: x"),
        (AppError::Acp("x".into()), "acp: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::Io("x".into()), "io: x"),
        (AppError::Unauthorized("x".into()), "unauthorized: x"),
        (AppError::NotSupported("x".into()), "not supported: x"),
        (AppError::Cancelled, "cancelled"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

/// I/O error kinds map onto the matching variants.
#[test]
fn io_errors_map_by_kind() {
    assert!(matches!(
        AppError::from(io::Error::new(io::ErrorKind::PermissionDenied, "no")),
        AppError::Unauthorized(_)
    ));
    assert!(matches!(
        AppError::from(io::Error::new(io::ErrorKind::Unsupported, "no")),
        AppError::NotSupported(_)
    ));
    assert!(matches!(
        AppError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone")),
        AppError::Io(_)
    ));
}

/// JSON and TOML errors become protocol and config errors.
#[test]
fn parse_errors_map_to_domain_variants() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").expect_err("invalid json");
    assert!(matches!(AppError::from(json_err), AppError::Acp(_)));

    let toml_err = toml::from_str::<toml::Value>("= =").expect_err("invalid toml");
    assert!(matches!(AppError::from(toml_err), AppError::Config(_)));
}

/// Only `Cancelled` reports as cancellation.
#[test]
fn cancellation_is_distinguished() {
    assert!(AppError::Cancelled.is_cancelled());
    assert!(!AppError::Io("x".into()).is_cancelled());
}
