use courtier::config::Config;
use courtier::net::protocol::DEFAULT_TOKEN_WIDTH;

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    config.validate().unwrap();
    assert_eq!(config.broker.queue_capacity, 1000);
    assert_eq!(config.client.token_width, DEFAULT_TOKEN_WIDTH);
    assert_eq!(config.server.token_width, DEFAULT_TOKEN_WIDTH);
    assert!(config.broker.local_workers >= 1);
    assert!(config.otel_endpoint.is_none());
}

#[test]
fn empty_file_is_all_defaults() {
    let config = Config::from_toml_str("").unwrap();
    assert_eq!(config.log_level, "info");
    assert_eq!(config.client.endpoint, "127.0.0.1:10000");
}

#[test]
fn partial_file_overrides_only_what_it_names() {
    let config = Config::from_toml_str(
        r#"
        log_level = "debug"

        [broker]
        queue_capacity = 16

        [client]
        endpoint = "10.0.0.5:7000"
        max_stalls = 0
        "#,
    )
    .unwrap();

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.broker.queue_capacity, 16);
    assert_eq!(config.broker.max_channel_id, 1 << 48);
    assert_eq!(config.client.endpoint, "10.0.0.5:7000");
    assert_eq!(config.client.max_stalls, 0);
    assert_eq!(config.client.max_connection_attempts, 10);
    assert_eq!(config.server.work_wait_ms, 1000);
}

#[test]
fn narrow_token_width_is_rejected() {
    let result = Config::from_toml_str("[server]\ntoken_width = 8\n");
    let err = result.unwrap_err().to_string();
    assert!(err.contains("server.token_width"), "{err}");
}

#[test]
fn zero_capacity_is_rejected() {
    assert!(Config::from_toml_str("[broker]\nqueue_capacity = 0\n").is_err());
}

#[test]
fn malformed_toml_is_an_error() {
    assert!(Config::from_toml_str("[broker\nqueue_capacity = ").is_err());
}

#[test]
fn load_reports_missing_file() {
    let err = Config::load(std::path::Path::new("/nonexistent/courtier.toml")).unwrap_err();
    assert!(err.to_string().contains("cannot read config file"));
}

#[test]
fn from_env_applies_overrides() {
    // The only test in this binary that touches the environment.
    unsafe {
        std::env::remove_var("COURTIER_CONFIG");
        std::env::set_var("LOG_LEVEL", "trace");
        std::env::set_var("OTEL_ENDPOINT", "http://localhost:4317");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.log_level, "trace");
    assert_eq!(config.otel_endpoint.as_deref(), Some("http://localhost:4317"));

    unsafe {
        std::env::remove_var("LOG_LEVEL");
        std::env::remove_var("OTEL_ENDPOINT");
    }
}
