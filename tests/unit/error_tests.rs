//! Unit tests for `AppError` display format and conversions.

use agent_bridge::AppError;

#[test]
fn every_variant_has_its_prefix() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Slack("x".into()), "slack: x"),
        (AppError::Process("x".into()), "process: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Delivery("x".into()), "delivery: x"),
        (AppError::Unauthorized("x".into()), "unauthorized: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_has_no_trailing_period() {
    let err = AppError::Delivery("no turn is running".into());
    let s = err.to_string();
    assert!(
        !s.ends_with('.'),
        "error message must not end with a period: {s}"
    );
}

#[test]
fn toml_error_converts_to_config() {
    let parse = toml::from_str::<toml::Value>("= broken").expect_err("invalid toml");
    let err = AppError::from(parse);
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn io_error_converts_to_io() {
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
    let err = AppError::from(io);
    assert!(matches!(err, AppError::Io(ref msg) if msg == "gone"));
}

#[test]
fn app_error_is_a_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&AppError::Process("spawn failed".into()));
}
