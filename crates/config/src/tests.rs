use crate::{ServiceConfig, clean_path, parse_path_list};
use figment::Jail;

#[test]
fn test_defaults() {
    let config = ServiceConfig::default();
    assert_eq!(config.grpc.port, 3000);
    assert!(config.grpc.log_interceptor);
    assert!(!config.grpc.log_payload);
    assert!(!config.grpc.use_enum_as_int);
    assert!(config.gateway.enabled);
    assert_eq!(config.gateway.port, 8080);
    assert_eq!(config.app.base_path, "/");
    assert!(config.app.special_url_path.is_empty());
}

#[test]
fn test_load_from_env() {
    Jail::expect_with(|jail| {
        jail.set_env("APP_NAME", "projects");
        jail.set_env("APP_BASE_PATH", "api/");
        jail.set_env("SPECIAL_URL_PATH", r#"["/health", "/ping"]"#);
        jail.set_env("GRPC_PORT", "4000");
        jail.set_env("GRPC_LOG_PAYLOAD", "true");
        jail.set_env("GRPC_DISABLE_EMIT_DEFAULTS", "true");
        jail.set_env("GRPC_USE_ENUM_AS_INT", "true");
        jail.set_env("GRPC_GATEWAY_ENABLED", "false");
        jail.set_env("GRPC_GATEWAY_PORT", "9090");
        jail.set_env("LOG_LEVEL", "debug");

        let config = ServiceConfig::load("config").expect("config should load");
        assert_eq!(config.app.name, "projects");
        assert_eq!(config.app.base_path, "/api");
        assert_eq!(config.app.special_url_path, vec!["/health", "/ping"]);
        assert_eq!(config.grpc.port, 4000);
        assert!(config.grpc.log_payload);
        assert!(config.grpc.disable_emit_defaults);
        assert!(config.grpc.use_enum_as_int);
        assert!(!config.gateway.enabled);
        assert_eq!(config.gateway.port, 9090);
        assert_eq!(config.telemetry.log_level, "debug");
        Ok(())
    });
}

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_dir("config")?;
        jail.create_file(
            "config/default.toml",
            r#"
            [grpc]
            port = 5000
            health_enabled = false

            [gateway]
            port = 8081
            "#,
        )?;
        jail.set_env("GRPC_GATEWAY_PORT", "8082");

        let config = ServiceConfig::load("config").expect("config should load");
        assert_eq!(config.grpc.port, 5000);
        assert!(!config.grpc.health_enabled);
        assert_eq!(config.gateway.port, 8082);
        Ok(())
    });
}

#[test]
fn test_parse_path_list() {
    assert_eq!(parse_path_list("").unwrap(), Vec::<String>::new());
    assert_eq!(parse_path_list(r#"["/health"]"#).unwrap(), vec!["/health"]);
    assert_eq!(parse_path_list("/health, /ping").unwrap(), vec!["/health", "/ping"]);
    assert!(parse_path_list("[not json").is_err());
}

#[test]
fn test_clean_path() {
    assert_eq!(clean_path("/"), "/");
    assert_eq!(clean_path("//api//v1/"), "/api/v1");
    assert_eq!(clean_path("/api/./v1/../v2"), "/api/v2");
    assert_eq!(clean_path("/.."), "/");
}
