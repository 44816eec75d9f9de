//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Name of the fixture environment; long so that extraction roots fit binary placeholders
pub const ENV_NAME: &str = "relocatable-environment-with-a-rather-long-name";

/// Files listed in the fixture's install record
pub const MANAGED: &[&str] = &["bin/python", "bin/tool", "etc/demo.conf", "lib/libdemo.so"];

/// Binary content embedding `prefix` in a NUL-terminated string table
pub fn elf_like(prefix: &str) -> Vec<u8> {
    let mut data = b"\x7fELF\x02\x01\x01\x00".to_vec();
    data.extend_from_slice(format!("{}/lib\x00", prefix).as_bytes());
    data.extend_from_slice(b"GLIBC_2.17\x00\xff\xfe");
    data
}

/// Create a conda-style environment under `root/envs/<ENV_NAME>`.
///
/// Returns the prefix.
pub fn conda_env(root: &Path) -> PathBuf {
    let prefix = root.join("envs").join(ENV_NAME);
    let p = prefix.to_string_lossy().to_string();

    for dir in ["conda-meta", "bin", "etc", "lib", "share"] {
        fs::create_dir_all(prefix.join(dir)).unwrap();
    }

    let record = serde_json::json!({
        "name": "demo",
        "version": "1.0",
        "files": MANAGED,
    });
    fs::write(
        prefix.join("conda-meta/demo-1.0-0.json"),
        serde_json::to_vec_pretty(&record).unwrap(),
    )
    .unwrap();
    fs::write(prefix.join("conda-meta/history"), "==> 2024-01-01 <==\n").unwrap();
    fs::write(prefix.join("bin/activate"), "#!/bin/sh\n").unwrap();

    write_mode(&prefix.join("bin/python"), &elf_like(&p), 0o755);
    write_mode(
        &prefix.join("bin/tool"),
        format!("#!{p}/bin/python\nDATA = '{p}/share'\n").as_bytes(),
        0o755,
    );
    write_mode(
        &prefix.join("etc/demo.conf"),
        format!("prefix = {p}\n").as_bytes(),
        0o644,
    );
    let mut lib = b"\x00\x01".to_vec();
    lib.extend_from_slice(format!("{p}:{p}/lib/extra\x00tail\x00").as_bytes());
    write_mode(&prefix.join("lib/libdemo.so"), &lib, 0o644);
    write_mode(
        &prefix.join("share/notes.txt"),
        format!("built in {p}\n").as_bytes(),
        0o644,
    );

    #[cfg(unix)]
    std::os::unix::fs::symlink(
        prefix.join("lib/libdemo.so"),
        prefix.join("lib/libdemo.so.1"),
    )
    .unwrap();

    prefix
}

/// Temporary directory plus fixture environment
pub fn fixture() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let prefix = conda_env(temp.path());
    (temp, prefix)
}

pub fn write_mode(path: &Path, content: &[u8], mode: u32) {
    fs::write(path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }
    #[cfg(not(unix))]
    let _ = mode;
}

/// One entry read back from a tar archive
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub name: String,
    pub mode: u32,
    pub mtime: u64,
    pub link: Option<String>,
    pub data: Vec<u8>,
}

/// Read every entry of a tar, tar.gz or tar.bz2 file
pub fn tar_entries(path: &Path) -> Vec<TarEntry> {
    let file = fs::File::open(path).unwrap();
    let name = path.to_string_lossy();
    let reader: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".tgz") {
        Box::new(flate2::read::GzDecoder::new(file))
    } else if name.ends_with(".bz2") || name.ends_with(".tbz2") {
        Box::new(bzip2::read::BzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive = tar::Archive::new(reader);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            TarEntry {
                name: entry.path().unwrap().to_string_lossy().to_string(),
                mode: entry.header().mode().unwrap(),
                mtime: entry.header().mtime().unwrap(),
                link: entry
                    .link_name()
                    .unwrap()
                    .map(|l| l.to_string_lossy().to_string()),
                data,
            }
        })
        .collect()
}

/// Find an entry by name
pub fn entry<'a>(entries: &'a [TarEntry], name: &str) -> &'a TarEntry {
    entries
        .iter()
        .find(|e| e.name == name)
        .unwrap_or_else(|| panic!("{} not in archive", name))
}
