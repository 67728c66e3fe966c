//! Configuration integration tests.
//!
//! Tests for configuration loading, layering and saving.

use std::fs;
use tempfile::TempDir;
use tendril_core::config::Config;
use tendril_provider::ModelTier;

/// Test that config loads from project directory.
#[tokio::test]
async fn test_load_project_config() {
    let temp = TempDir::new().expect("Failed to create temp dir");

    let config_content = r#"{
        "model": "opus",
        "max_input_tokens": 100000,
        "tools": { "python": "python3.12" }
    }"#;
    fs::write(temp.path().join("tendril.json"), config_content).expect("Failed to write config");

    let (config, sources) = Config::load(Some(temp.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.model(), ModelTier::Opus);
    assert_eq!(config.limits().max_input_tokens, 100_000);
    assert_eq!(config.tools().python, "python3.12");
    assert_eq!(config.tools().shell, "/bin/bash");
    assert!(sources.iter().any(|s| s.ends_with("tendril.json")));
}

/// Test that JSONC comments are handled and preferred over plain JSON.
#[tokio::test]
async fn test_load_jsonc_config() {
    let temp = TempDir::new().expect("Failed to create temp dir");

    let config_content = r#"{
        // This is a comment
        "low_battery_threshold": 30,
        /* Multi-line
           comment */
        "prompts": { "suffix": "state {{BATTERY}}" }
    }"#;
    fs::write(temp.path().join("tendril.jsonc"), config_content).expect("Failed to write config");
    fs::write(temp.path().join("tendril.json"), r#"{"low_battery_threshold": 5}"#)
        .expect("Failed to write config");

    let (config, _) = Config::load(Some(temp.path()))
        .await
        .expect("Failed to load config");

    assert_eq!(config.limits().low_battery_threshold, 30.0);
    assert_eq!(config.prompts().suffix, "state {{BATTERY}}");
    assert!(!config.prompts().system.is_empty());
}

/// Test that invalid values are rejected at load time.
#[tokio::test]
async fn test_invalid_config_rejected() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(
        temp.path().join("tendril.json"),
        r#"{"low_battery_threshold": 150}"#,
    )
    .expect("Failed to write config");

    let err = Config::load(Some(temp.path())).await.unwrap_err();
    assert!(err.to_string().contains("low_battery_threshold"));
}

/// Test that malformed JSON names the offending file.
#[tokio::test]
async fn test_malformed_config_names_file() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp.path().join("tendril.json"), "{ not json").expect("Failed to write config");

    let err = Config::load(Some(temp.path())).await.unwrap_err();
    assert!(err.to_string().contains("tendril.json"));
}
