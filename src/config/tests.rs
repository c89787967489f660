use super::settings::{BusBackend, Settings};
use super::load_config;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.hub.queue_capacity, 256);
    assert!(settings.hub.ping_period_secs < settings.hub.pong_wait_secs);
    assert_eq!(settings.jobs.chat_timeout_secs, 30);
    assert_eq!(settings.jobs.analysis_timeout_secs, 60);
    assert_eq!(settings.bus.backend, BusBackend::Memory);
    assert_eq!(settings.bus.prefix, "websocket");
    assert_eq!(settings.files.upload_dir, "uploads");
}

/// Runs `f` with the working directory switched to a fresh temp dir.
fn in_temp_dir<F: FnOnce(&TempDir)>(f: F) {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");
    f(&tmp);
    env::set_current_dir(orig).expect("restore cwd");
}

#[test]
#[serial]
fn load_config_without_sources_uses_defaults() {
    in_temp_dir(|_| {
        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.hub.max_coalesce, 64);
        assert_eq!(cfg.bus.patterns.len(), 5);
    });
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    in_temp_dir(|_| {
        fs::create_dir_all("config").expect("create config dir");
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9000

            [hub]
            queue_capacity = 8

            [bus]
            backend = "disabled"
            patterns = ["reports:*"]
        "#;
        fs::write("config/default.toml", toml).expect("write config file");

        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.hub.queue_capacity, 8);
        // untouched keys in a partially specified section keep defaults
        assert_eq!(cfg.hub.pong_wait_secs, 60);
        assert_eq!(cfg.bus.backend, BusBackend::Disabled);
        assert_eq!(cfg.bus.patterns, vec!["reports:*".to_string()]);
        assert_eq!(cfg.jobs.raw_model, "gpt-4o-mini");
    });
}

#[test]
#[serial]
fn load_config_reads_prefixed_environment() {
    in_temp_dir(|_| {
        temp_env::with_vars(
            [
                ("AIRHUB__SERVER__PORT", Some("9100")),
                ("AIRHUB__JOBS__CHAT_TIMEOUT_SECS", Some("5")),
                ("AIRHUB__LLM__ENABLED", Some("false")),
            ],
            || {
                let cfg = load_config().expect("load_config failed");
                assert_eq!(cfg.server.port, 9100);
                assert_eq!(cfg.jobs.chat_timeout_secs, 5);
                assert!(!cfg.llm.enabled);
            },
        );
    });
}
