#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use activities_host::config;

#[test]
fn deny_unknown_fields() {
    let bad = r#"
version: 1
accepts_chanel: true # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert!(!cfg.accepts_channel);
    assert_eq!(cfg.popup_connect_timeout_ms, 5000);
    assert_eq!(cfg.resize_debounce_ms, 50);
}

#[test]
fn full_config() {
    let ok = r#"
version: 1
accepts_channel: true
popup_connect_timeout_ms: 2500
resize_debounce_ms: 0
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert!(cfg.accepts_channel);
    assert_eq!(cfg.popup_connect_timeout().as_millis(), 2500);
    assert!(cfg.resize_debounce().is_zero());
}

#[test]
fn out_of_range_values_fail_validation() {
    for bad in [
        "version: 2\n",
        "version: 1\npopup_connect_timeout_ms: 50\n",
        "version: 1\npopup_connect_timeout_ms: 60001\n",
        "version: 1\nresize_debounce_ms: 1001\n",
    ] {
        let err = config::load_from_str(bad).expect_err(bad);
        assert!(err.to_string().starts_with("config: "), "{err}");
    }
}

#[test]
fn version_is_required() {
    assert!(config::load_from_str("accepts_channel: true\n").is_err());
}

#[test]
fn missing_file_is_a_config_error() {
    let err = config::load_from_file("/nonexistent/activities.yaml").expect_err("must fail");
    assert_eq!(err.code().as_str(), "CONFIG");
}
