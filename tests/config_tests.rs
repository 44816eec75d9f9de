//! Tests for envpack config module

use envpack::{
    output_and_format, ArchiveFormat, FilterKind, FilterSpec, MissingCachePolicy, PackOptions,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_output_and_format_defaults() {
    let (output, format) = output_and_format("py36", None, None).unwrap();
    assert_eq!(output, PathBuf::from("py36.tar.gz"));
    assert_eq!(format, ArchiveFormat::TarGz);
}

#[test]
fn test_format_implies_extension() {
    for (name, ext, expected) in [
        ("zip", "zip", ArchiveFormat::Zip),
        ("tar", "tar", ArchiveFormat::Tar),
        ("tgz", "tar.gz", ArchiveFormat::TarGz),
        ("tbz2", "tar.bz2", ArchiveFormat::TarBz2),
    ] {
        let (output, format) = output_and_format("py36", None, Some(name)).unwrap();
        assert_eq!(format, expected);
        assert_eq!(output, PathBuf::from(format!("py36.{}", ext)));
    }
}

#[test]
fn test_extension_implies_format() {
    for (file, expected) in [
        ("foo.zip", ArchiveFormat::Zip),
        ("foo.tar", ArchiveFormat::Tar),
        ("foo.tar.gz", ArchiveFormat::TarGz),
        ("foo.tgz", ArchiveFormat::TarGz),
        ("foo.tar.bz2", ArchiveFormat::TarBz2),
        ("foo.tbz2", ArchiveFormat::TarBz2),
    ] {
        let (output, format) = output_and_format("py36", Some(Path::new(file)), None).unwrap();
        assert_eq!(output, PathBuf::from(file));
        assert_eq!(format, expected, "{}", file);
    }
}

#[test]
fn test_unknown_format_or_extension() {
    let err = output_and_format("py36", None, Some("foo")).unwrap_err();
    assert!(err.is_configuration());

    let err = output_and_format("py36", Some(Path::new("foo.bar")), None).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_explicit_format_with_output() {
    // Unrecognised extension: the explicit format wins
    let (output, format) =
        output_and_format("py36", Some(Path::new("archive.bin")), Some("zip")).unwrap();
    assert_eq!(output, PathBuf::from("archive.bin"));
    assert_eq!(format, ArchiveFormat::Zip);

    // Agreeing extension
    assert!(output_and_format("py36", Some(Path::new("a.tgz")), Some("tar.gz")).is_ok());

    // Conflicting extension
    let err = output_and_format("py36", Some(Path::new("a.zip")), Some("tar")).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn test_filter_spec_parse() {
    assert_eq!(
        FilterSpec::new("exclude", "*.pyc").parse().unwrap().kind,
        FilterKind::Exclude
    );
    assert!(FilterSpec::new("remove", "*.pyc").parse().is_err());
}

#[test]
fn test_validate() {
    assert!(PackOptions::prefix("/opt/env").validate().is_ok());

    let mut both = PackOptions::prefix("/opt/env");
    both.name = Some("env".to_string());
    assert!(both.validate().unwrap_err().is_configuration());

    assert!(PackOptions::prefix("/opt/env")
        .with_format("rar")
        .validate()
        .is_err());
    assert!(PackOptions::prefix("/opt/env")
        .with_filter("keep", "*")
        .validate()
        .is_err());
    assert!(PackOptions::prefix("/opt/env")
        .with_jobs(0)
        .validate()
        .is_err());
    assert!(PackOptions::prefix("/opt/env")
        .with_dest_prefix("")
        .validate()
        .is_err());
}

#[test]
fn test_builder_defaults() {
    let options = PackOptions::default();
    assert!(options.zip64);
    assert!(!options.force);
    assert_eq!(options.missing_cache, MissingCachePolicy::Warn);

    let options = PackOptions::name("py36")
        .with_zip64(false)
        .with_force(true)
        .with_missing_cache(MissingCachePolicy::Raise)
        .with_extra_placeholder("/build/placeholder");
    assert_eq!(options.name.as_deref(), Some("py36"));
    assert!(!options.zip64);
    assert!(options.force);
    assert_eq!(options.extra_placeholders, vec!["/build/placeholder"]);
}

#[test]
fn test_from_toml() {
    let options = PackOptions::from_toml(
        r#"
prefix = "/opt/conda/envs/py311"
format = "zip"
dest_prefix = "/srv/py311"
jobs = 4
missing_cache = "raise"

[[filters]]
kind = "exclude"
pattern = "*.pyc"

[[filters]]
kind = "include"
pattern = "keep/*.pyc"
"#,
    )
    .unwrap();

    assert_eq!(options.prefix, Some(PathBuf::from("/opt/conda/envs/py311")));
    assert_eq!(options.format.as_deref(), Some("zip"));
    assert_eq!(options.jobs, Some(4));
    assert!(options.zip64);
    assert_eq!(options.missing_cache, MissingCachePolicy::Raise);
    let filters = options.parsed_filters().unwrap();
    assert_eq!(filters.len(), 2);
    assert_eq!(filters[1].kind, FilterKind::Include);
}

#[test]
fn test_from_toml_invalid() {
    assert!(PackOptions::from_toml("jobs = \"many\"").is_err());
}

#[test]
fn test_load_resolves_relative_paths() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("envpack.toml");
    std::fs::write(
        &path,
        "prefix = \"envs/demo\"\noutput = \"/abs/out.tar\"\nenvs_dirs = [\"envs\"]\n",
    )
    .unwrap();

    let options = PackOptions::load(&path).unwrap();
    assert_eq!(options.prefix, Some(temp.path().join("envs/demo")));
    assert_eq!(options.output, Some(PathBuf::from("/abs/out.tar")));
    assert_eq!(options.envs_dirs, vec![temp.path().join("envs")]);
}
