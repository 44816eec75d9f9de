//! End-to-end tests for the finalize stub, using the built envpack binary as runner

mod common;

use common::{elf_like, fixture};
use envpack::{PackOptions, Packer, FINALIZED_MARKER, FINALIZE_ENTRY};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const RUNNER: &str = env!("CARGO_BIN_EXE_envpack");

/// Run a freshly extracted executable, retrying while another test thread
/// still holds a writable handle to it
fn run(exe: &Path, args: &[&str]) -> Output {
    for _ in 0..20 {
        match Command::new(exe).args(args).output() {
            Ok(output) => return output,
            Err(e) if e.raw_os_error() == Some(26) => {
                std::thread::sleep(std::time::Duration::from_millis(50))
            }
            Err(e) => panic!("failed to run {}: {}", exe.display(), e),
        }
    }
    panic!("{} stayed busy", exe.display());
}

/// Pack the fixture with deferred rewrites and extract it into a new directory
fn pack_and_extract(format: &str) -> (TempDir, PathBuf, String, PathBuf) {
    let (temp, prefix) = fixture();
    let archive = temp.path().join(format!("env.{}", format));
    Packer::new(
        PackOptions::prefix(&prefix)
            .with_output(&archive)
            .with_stub_runner(RUNNER),
    )
    .pack()
    .unwrap();

    let root = temp.path().join("x");
    fs::create_dir_all(&root).unwrap();
    if format == "zip" {
        let mut zip = zip::ZipArchive::new(fs::File::open(&archive).unwrap()).unwrap();
        zip.extract(&root).unwrap();
    } else {
        let file = fs::File::open(&archive).unwrap();
        tar::Archive::new(flate2::read::GzDecoder::new(file))
            .unpack(&root)
            .unwrap();
    }

    let root = fs::canonicalize(&root).unwrap();
    (temp, prefix.clone(), prefix.to_string_lossy().to_string(), root)
}

#[cfg(unix)]
#[test]
fn test_deferred_roundtrip() {
    let (_temp, _prefix, original, root) = pack_and_extract("tar.gz");
    let r = root.to_string_lossy().to_string();
    assert!(r.len() <= original.len());

    let stub = root.join(FINALIZE_ENTRY);
    let output = run(&stub, &[]);
    assert!(output.status.success(), "{:?}", output);
    assert!(output.stdout.is_empty());

    assert_eq!(
        fs::read_to_string(root.join("etc/demo.conf")).unwrap(),
        format!("prefix = {}\n", r)
    );
    assert_eq!(
        fs::read_to_string(root.join("bin/tool")).unwrap(),
        format!("#!/usr/bin/env python\nDATA = '{}/share'\n", r)
    );

    let python = fs::read(root.join("bin/python")).unwrap();
    let expected = elf_like(&original);
    assert_eq!(python.len(), expected.len());
    let needle = format!("{}/lib\x00", r);
    assert!(python
        .windows(needle.len())
        .any(|w| w == needle.as_bytes()));

    // Unmanaged content stays as packed
    assert!(fs::read_to_string(root.join("share/notes.txt"))
        .unwrap()
        .contains(&original));

    assert_eq!(
        fs::read_to_string(root.join(FINALIZED_MARKER)).unwrap(),
        r
    );

    // A second run is a silent no-op
    let before = fs::read(root.join("etc/demo.conf")).unwrap();
    let again = run(&stub, &[]);
    assert!(again.status.success(), "{:?}", again);
    assert!(again.stdout.is_empty());
    assert_eq!(fs::read(root.join("etc/demo.conf")).unwrap(), before);
}

#[cfg(unix)]
#[test]
fn test_deferred_roundtrip_zip() {
    let (_temp, _prefix, _original, root) = pack_and_extract("zip");
    let output = run(&root.join(FINALIZE_ENTRY), &[]);
    assert!(output.status.success(), "{:?}", output);
    assert_eq!(
        fs::read_to_string(root.join("etc/demo.conf")).unwrap(),
        format!("prefix = {}\n", root.display())
    );
}

#[cfg(unix)]
#[test]
fn test_moved_environment_fails() {
    let (temp, _prefix, _original, root) = pack_and_extract("tar.gz");
    assert!(run(&root.join(FINALIZE_ENTRY), &[]).status.success());

    let moved = temp.path().join("y");
    fs::rename(&root, &moved).unwrap();
    let output = run(&moved.join(FINALIZE_ENTRY), &[]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("moved"), "{}", stderr);
}

#[cfg(unix)]
#[test]
fn test_stub_help_and_version() {
    let (_temp, _prefix, _original, root) = pack_and_extract("tar.gz");
    let stub = root.join(FINALIZE_ENTRY);

    let version = run(&stub, &["--version"]);
    assert!(version.status.success());
    let stdout = String::from_utf8_lossy(&version.stdout);
    assert!(stdout.contains(envpack::VERSION), "{}", stdout);

    let help = run(&stub, &["--help"]);
    assert!(help.status.success());
    assert!(String::from_utf8_lossy(&help.stdout).contains("envpack-unpack"));

    // Neither flag rewrites anything
    assert!(!root.join(FINALIZED_MARKER).exists());
}

#[test]
fn test_runner_without_overlay_is_not_a_stub() {
    let output = run(Path::new(RUNNER), &["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("envpack "));
}
