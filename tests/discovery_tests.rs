//! Tests for envpack discovery module

mod common;

use common::{fixture, MANAGED};
use envpack::{Discover, EnvLocator, MissingCachePolicy, PackError, PrefixScanner};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_discover_fixture() {
    let (_temp, prefix) = fixture();
    let discovered = PrefixScanner::new(&prefix).discover().unwrap();

    assert_eq!(discovered.name, common::ENV_NAME);
    assert_eq!(discovered.prefix, prefix.to_string_lossy());
    assert!(discovered.warnings.is_empty());

    let managed: Vec<_> = discovered
        .files
        .iter()
        .filter(|f| f.is_managed)
        .map(|f| f.target.as_str())
        .collect();
    assert_eq!(managed, MANAGED);

    let targets: Vec<_> = discovered.files.iter().map(|f| f.target.as_str()).collect();
    assert!(targets.contains(&"conda-meta/demo-1.0-0.json"));
    assert!(targets.contains(&"share/notes.txt"));
    assert!(!targets.contains(&"conda-meta/history"));
    assert!(!targets.contains(&"bin/activate"));

    let mut sorted = targets.clone();
    sorted.sort();
    assert_eq!(targets, sorted);
}

#[test]
fn test_missing_prefix() {
    let temp = TempDir::new().unwrap();
    let err = PrefixScanner::new(temp.path().join("nope")).discover().unwrap_err();
    assert!(matches!(err, PackError::EnvironmentNotFound(_)));
    assert!(err.is_discovery());
}

#[test]
fn test_not_an_environment() {
    let temp = TempDir::new().unwrap();
    let err = PrefixScanner::new(temp.path()).discover().unwrap_err();
    assert!(matches!(err, PackError::NotAnEnvironment(_)));
}

#[test]
fn test_editable_packages() {
    let (_temp, prefix) = fixture();
    let site = prefix.join("lib/python3.11/site-packages");
    fs::create_dir_all(&site).unwrap();
    fs::write(site.join("mypkg.egg-link"), "/home/me/src/mypkg\n.").unwrap();

    let err = PrefixScanner::new(&prefix).discover().unwrap_err();
    assert!(err.to_string().contains("Editable packages found"));
    assert!(err.to_string().contains("mypkg.egg-link"));
}

#[test]
fn test_overlapping_installs() {
    let (_temp, prefix) = fixture();
    fs::write(
        prefix.join("conda-meta/toolz-0.12-0.json"),
        r#"{"name": "toolz", "files": ["lib/python3.11/site-packages/toolz/__init__.py"]}"#,
    )
    .unwrap();
    fs::write(
        prefix.join("conda-meta/pip-23.0-0.json"),
        r#"{"name": "pip", "paths_data": {"paths": [{"_path": "lib/python3.11/site-packages/toolz/__init__.py"}]}}"#,
    )
    .unwrap();

    let err = PrefixScanner::new(&prefix).discover().unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("pip"), "{}", msg);
    assert!(msg.contains("toolz"), "{}", msg);
}

#[test]
fn test_missing_package_cache() {
    let (temp, prefix) = fixture();
    let missing = temp.path().join("pkgs/conda_pack_test_lib2-0.0.1-0");
    let record = serde_json::json!({
        "name": "conda_pack_test_lib2",
        "extracted_package_dir": missing,
        "files": [],
    });
    fs::write(
        prefix.join("conda-meta/conda_pack_test_lib2-0.0.1-0.json"),
        serde_json::to_vec(&record).unwrap(),
    )
    .unwrap();

    let discovered = PrefixScanner::new(&prefix).discover().unwrap();
    assert_eq!(discovered.warnings.len(), 1);
    assert!(discovered.warnings[0]
        .to_string()
        .contains("conda_pack_test_lib2"));
    assert!(!discovered.files.is_empty());

    let err = PrefixScanner::new(&prefix)
        .with_missing_cache(MissingCachePolicy::Raise)
        .discover()
        .unwrap_err();
    assert!(matches!(err, PackError::MissingPackageCache(ref names) if names == &["conda_pack_test_lib2"]));
}

#[test]
fn test_declared_placeholders() {
    let (_temp, prefix) = fixture();
    fs::write(
        prefix.join("conda-meta/extra-1.0-0.json"),
        r#"{"name": "extra", "paths_data": {"paths": [
            {"_path": "share/extra.txt", "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3"}
        ]}}"#,
    )
    .unwrap();
    fs::write(prefix.join("share/extra.txt"), "x").unwrap();

    let discovered = PrefixScanner::new(&prefix).discover().unwrap();
    assert_eq!(
        discovered.placeholders,
        vec!["/opt/anaconda1anaconda2anaconda3"]
    );
    assert!(discovered
        .files
        .iter()
        .any(|f| f.target == "share/extra.txt" && f.is_managed));
}

#[test]
fn test_env_locator() {
    let (temp, prefix) = fixture();
    let locator = EnvLocator::new([temp.path().join("missing"), temp.path().join("envs")]);
    assert_eq!(locator.locate(common::ENV_NAME).unwrap(), prefix);

    let err = locator.locate("this_is_probably_not_a_real_env_name").unwrap_err();
    assert!(err.to_string().contains("Failed to determine path to environment"));
}

#[test]
fn test_owned_entry_points_are_kept() {
    let (_temp, prefix) = fixture();
    fs::write(prefix.join("bin/conda"), "#!/bin/sh\n").unwrap();
    fs::write(
        prefix.join("conda-meta/conda-4.0-0.json"),
        r#"{"name": "conda", "files": ["bin/conda", "bin/activate"]}"#,
    )
    .unwrap();

    let discovered = PrefixScanner::new(&prefix).discover().unwrap();
    let targets: Vec<_> = discovered.files.iter().map(|f| f.target.as_str()).collect();
    assert!(targets.contains(&"bin/conda"));
    assert!(targets.contains(&"bin/activate"));
    assert!(!targets.contains(&"conda-meta/history"));
}

#[test]
fn test_unowned_entry_points_are_skipped() {
    let (_temp, prefix) = fixture();
    fs::write(prefix.join("bin/conda"), "#!/bin/sh\n").unwrap();
    fs::write(prefix.join("bin/deactivate"), "#!/bin/sh\n").unwrap();

    let discovered = PrefixScanner::new(&prefix).discover().unwrap();
    let targets: Vec<_> = discovered.files.iter().map(|f| f.target.as_str()).collect();
    for skipped in ["bin/conda", "bin/activate", "bin/deactivate"] {
        assert!(!targets.contains(&skipped), "{} should be skipped", skipped);
    }
}

#[test]
fn test_placeholder_files_come_from_package_cache() {
    let (temp, prefix) = fixture();
    let cache = temp.path().join("pkgs/cached-1.0-0");
    fs::create_dir_all(cache.join("share")).unwrap();
    fs::write(cache.join("share/cached.txt"), "root=/opt/anaconda1anaconda2anaconda3\n").unwrap();
    fs::write(prefix.join("share/cached.txt"), format!("root={}\n", prefix.display())).unwrap();
    fs::write(prefix.join("share/plain.txt"), "plain\n").unwrap();

    let record = serde_json::json!({
        "name": "cached",
        "extracted_package_dir": cache,
        "paths_data": {"paths": [
            {"_path": "share/cached.txt", "prefix_placeholder": "/opt/anaconda1anaconda2anaconda3"},
            {"_path": "share/plain.txt"},
        ]},
    });
    fs::write(
        prefix.join("conda-meta/cached-1.0-0.json"),
        serde_json::to_vec(&record).unwrap(),
    )
    .unwrap();

    let discovered = PrefixScanner::new(&prefix).discover().unwrap();
    assert!(discovered.warnings.is_empty());
    let source = |target: &str| {
        discovered
            .files
            .iter()
            .find(|f| f.target == target)
            .map(|f| f.source.clone())
            .unwrap()
    };
    assert_eq!(source("share/cached.txt"), cache.join("share/cached.txt"));
    assert_eq!(source("share/plain.txt"), prefix.join("share/plain.txt"));
}
