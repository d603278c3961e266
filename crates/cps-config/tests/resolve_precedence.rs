use cps_config::resolve::resolve_from;
use cps_config::{ConfigPaths, ConfigSource, ValidationError};
use std::fs;
use tempfile::TempDir;

fn write_config(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).expect("write config");
    path
}

#[test]
fn explicit_path_wins_over_env_and_user() {
    let dir = TempDir::new().expect("tempdir");
    let explicit = write_config(&dir, "explicit.json", r#"{"tree": {"levels": 3, "cell_size": 1.0}}"#);
    let env = write_config(&dir, "env.json", r#"{"tree": {"levels": 4, "cell_size": 1.0}}"#);
    let user = write_config(&dir, "user.json", r#"{"tree": {"levels": 5, "cell_size": 1.0}}"#);

    let resolved = resolve_from(&ConfigPaths {
        explicit: Some(explicit.clone()),
        env: Some(env),
        user: Some(user),
    })
    .expect("resolve");

    assert_eq!(resolved.config.tree.levels, 3);
    assert_eq!(resolved.source, ConfigSource::Explicit(explicit));
}

#[test]
fn env_path_used_without_explicit() {
    let dir = TempDir::new().expect("tempdir");
    let env = write_config(&dir, "env.json", r#"{"segments": {"max_passes_per_segment": 64}}"#);

    let resolved = resolve_from(&ConfigPaths {
        explicit: None,
        env: Some(env.clone()),
        user: None,
    })
    .expect("resolve");

    assert_eq!(resolved.config.segments.max_passes_per_segment, 64);
    assert_eq!(resolved.source, ConfigSource::Environment(env));
}

#[test]
fn missing_user_file_falls_back_to_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let resolved = resolve_from(&ConfigPaths {
        explicit: None,
        env: None,
        user: Some(dir.path().join("absent.json")),
    })
    .expect("resolve");

    assert_eq!(resolved.source, ConfigSource::Defaults);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let result = resolve_from(&ConfigPaths {
        explicit: Some("/nonexistent/cps.json".into()),
        env: None,
        user: None,
    });
    assert!(matches!(result, Err(ValidationError::IoError(_))));
}

#[test]
fn invalid_geometry_is_rejected() {
    let dir = TempDir::new().expect("tempdir");
    let bad = write_config(&dir, "bad.json", r#"{"tree": {"levels": 9, "cell_size": -1.0}}"#);

    let result = resolve_from(&ConfigPaths {
        explicit: Some(bad),
        env: None,
        user: None,
    });
    match result {
        Err(ValidationError::Invalid(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected invalid config, got {other:?}"),
    }
}
