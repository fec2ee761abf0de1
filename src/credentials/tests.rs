use super::*;
use chrono::TimeZone;

fn sh(script: &str) -> HelperCommandSource {
    HelperCommandSource::new("sh", vec!["-c".to_string(), script.to_string()], "Bearer")
}

#[test]
fn test_parse_helper_output() {
    let json = br#"{
        "configuration": {"active_configuration": "default"},
        "credential": {
            "access_token": "ya29.abc",
            "id_token": "ignored",
            "token_expiry": "2026-10-18T12:00:00Z"
        },
        "sentinels": {"config_sentinel": "/tmp/sentinel"}
    }"#;

    let token = parse_helper_output(json, "Bearer").unwrap();
    assert_eq!(token.access_token(), "ya29.abc");
    assert_eq!(token.token_type(), "Bearer");
    assert_eq!(
        token.expiry(),
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    );
}

#[test]
fn test_parse_helper_output_converts_offset_to_utc() {
    let json = br#"{"credential": {"access_token": "t", "token_expiry": "2026-10-18T14:00:00+02:00"}}"#;

    let token = parse_helper_output(json, "Bearer").unwrap();
    assert_eq!(
        token.expiry(),
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap()
    );
}

#[test]
fn test_parse_helper_output_malformed_json() {
    let result = parse_helper_output(b"not json", "Bearer");
    assert!(matches!(result, Err(MintError::Malformed(_))));
}

#[test]
fn test_parse_helper_output_missing_credential() {
    let result = parse_helper_output(br#"{"configuration": {}}"#, "Bearer");
    assert!(matches!(result, Err(MintError::Malformed(_))));
}

#[test]
fn test_parse_helper_output_bad_expiry() {
    let json = br#"{"credential": {"access_token": "t", "token_expiry": "tomorrow-ish"}}"#;

    let err = parse_helper_output(json, "Bearer").unwrap_err();
    assert!(matches!(err, MintError::Expiry(_)));
    assert!(err.to_string().contains("tomorrow-ish"));
}

#[test]
fn test_token_type_normalisation() {
    let expiry = Utc::now();
    assert_eq!(Token::new("", "t", expiry).token_type(), "Bearer");
    assert_eq!(Token::new("bearer", "t", expiry).token_type(), "Bearer");
    assert_eq!(Token::new("mac", "t", expiry).token_type(), "MAC");
    assert_eq!(Token::new("BASIC", "t", expiry).token_type(), "Basic");
    assert_eq!(Token::new("DPoP", "t", expiry).token_type(), "DPoP");
}

#[test]
fn test_authorization_value_and_header() {
    let token = Token::new("Bearer", "abc123", Utc::now());
    assert_eq!(token.authorization_value(), "Bearer abc123");

    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic old"));
    token.set_auth_header(&mut headers).unwrap();

    let value = headers.get(header::AUTHORIZATION).unwrap();
    assert_eq!(value, "Bearer abc123");
    assert!(value.is_sensitive());
}

#[test]
fn test_set_auth_header_rejects_invalid_value() {
    let token = Token::new("Bearer", "bad\ntoken", Utc::now());
    let mut headers = HeaderMap::new();
    assert!(token.set_auth_header(&mut headers).is_err());
    assert!(headers.get(header::AUTHORIZATION).is_none());
}

#[test]
fn test_validity_with_skew() {
    let now = Utc::now();
    let token = Token::new("Bearer", "t", now + Duration::seconds(60));

    assert!(token.is_valid_at(now, Duration::zero()));
    assert!(token.is_valid_at(now, Duration::seconds(30)));
    assert!(!token.is_valid_at(now, Duration::seconds(60)));
    assert!(!token.is_valid_at(now + Duration::seconds(60), Duration::zero()));
    // A skew that overflows the timestamp never counts as valid
    assert!(!token.is_valid_at(now, Duration::try_days(100_000_000).unwrap()));
}

#[test]
fn test_debug_redacts_access_token() {
    let token = Token::new("Bearer", "super-secret", Utc::now());
    let debug = format!("{:?}", token);
    assert!(!debug.contains("super-secret"));
}

#[tokio::test]
async fn test_helper_command_mint_success() {
    let source = sh(
        r#"printf '{"credential":{"access_token":"from-helper","token_expiry":"2030-01-01T00:00:00Z"}}'"#,
    );

    let token = source.mint().await.unwrap();
    assert_eq!(token.access_token(), "from-helper");
    assert_eq!(
        token.expiry(),
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_helper_command_nonzero_exit() {
    let source = sh("echo 'not logged in' >&2; exit 3");

    let err = source.mint().await.unwrap_err();
    match err {
        MintError::Exit { stderr, .. } => assert_eq!(stderr, "not logged in"),
        other => panic!("expected Exit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_helper_command_not_found() {
    let source = HelperCommandSource::new("authproxy-no-such-helper", vec![], "Bearer");

    let err = source.mint().await.unwrap_err();
    assert!(matches!(err, MintError::Spawn(_)));
}

#[tokio::test]
async fn test_helper_command_malformed_output() {
    let source = sh("echo hello");

    let err = source.mint().await.unwrap_err();
    assert!(matches!(err, MintError::Malformed(_)));
}
