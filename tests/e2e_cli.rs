//! CLI end-to-end tests
//!
//! Tests for the stillforged command-line interface against a temporary
//! local object store.

use assert_cmd::prelude::*;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use predicates::prelude::*;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

/// Get a command for the stillforged binary
#[allow(deprecated)]
fn stillforged_cmd() -> Command {
    let mut cmd = Command::cargo_bin("stillforged").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn png_bytes() -> Vec<u8> {
    let img = RgbImage::from_fn(20, 14, |x, y| Rgb([x as u8 * 12, y as u8 * 18, 200]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Temp workspace with a `photos` bucket and a config file pointing at it.
struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(data.join("photos/2024")).unwrap();

        let config = dir.path().join("stillforged.toml");
        fs::write(
            &config,
            format!(
                r#"
[store]
root = "{data}"
bucket = "photos"

[conversion]
concurrency = 2
dispatch_delay_ms = 0

[ledger]
path = "{ledger}"
"#,
                data = data.display(),
                ledger = dir.path().join("ledger.json").display(),
            ),
        )
        .unwrap();

        Self { dir, config }
    }

    fn bucket(&self) -> PathBuf {
        self.dir.path().join("data/photos")
    }

    fn put(&self, key: &str, data: &[u8]) {
        let path = self.bucket().join(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn cmd(&self) -> Command {
        let mut cmd = stillforged_cmd();
        cmd.arg("--config").arg(&self.config);
        cmd
    }
}

fn exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = stillforged_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    let mut cmd = stillforged_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("stillforged"))
        .stdout(predicate::str::contains("convert"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = stillforged_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_convert_help() {
    let mut cmd = stillforged_cmd();
    cmd.args(["convert", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--concurrency"));
}

#[test]
fn test_cli_validate_config() {
    let ws = Workspace::new();
    let mut cmd = stillforged_cmd();
    cmd.arg("validate")
        .arg(&ws.config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_cli_validate_rejects_bad_quality() {
    let ws = Workspace::new();
    let config = fs::read_to_string(&ws.config)
        .unwrap()
        .replace("concurrency = 2", "concurrency = 2\nquality = 0");
    fs::write(&ws.config, config).unwrap();

    let mut cmd = stillforged_cmd();
    cmd.arg("validate")
        .arg(&ws.config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("quality"));
}

#[test]
fn test_cli_convert_then_rerun() {
    let ws = Workspace::new();
    let png = png_bytes();
    ws.put("2024/beach.png", &png);
    ws.put("2024/forest.PNG", &png);
    ws.put("2024/notes.txt", b"not an image");

    ws.cmd()
        .args(["convert", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"totalImages\": 2"))
        .stdout(predicate::str::contains("\"successful\": 2"));

    assert!(exists(ws.bucket().join("2024/beach.webp")));
    assert!(exists(ws.bucket().join("2024/forest.webp")));
    assert!(exists(ws.bucket().join(".stillforged-meta/2024/beach.webp.json")));
    assert!(exists(ws.dir.path().join("ledger.json")));

    ws.cmd()
        .args(["convert", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"skipped\": 2"))
        .stdout(predicate::str::contains("\"successful\": 0"));

    ws.cmd()
        .args(["status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"records\": 2"))
        .stdout(predicate::str::contains("\"pending\": 0"));
}

#[test]
fn test_cli_convert_dry_run() {
    let ws = Workspace::new();
    ws.put("2024/beach.png", &png_bytes());

    ws.cmd()
        .args(["convert", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Successful:        1"));

    assert!(!exists(ws.bucket().join("2024/beach.webp")));
    assert!(!exists(ws.dir.path().join("ledger.json")));
}

#[test]
fn test_cli_convert_fails_on_bad_image() {
    let ws = Workspace::new();
    ws.put("2024/good.png", &png_bytes());
    ws.put("2024/bad.jpg", b"definitely not a jpeg");

    ws.cmd()
        .arg("convert")
        .assert()
        .failure()
        .stdout(predicate::str::contains("2024/bad.jpg"))
        .stderr(predicate::str::contains("1 objects failed to convert"));

    assert!(exists(ws.bucket().join("2024/good.webp")));
}

#[test]
fn test_cli_convert_prefix_and_format_overrides() {
    let ws = Workspace::new();
    ws.put("2024/a.png", &png_bytes());
    ws.put("archive/b.png", &png_bytes());

    ws.cmd()
        .args(["convert", "--prefix", "archive/", "--format", "jpeg", "--quality", "70"])
        .assert()
        .success();

    assert!(exists(ws.bucket().join("archive/b.jpg")));
    assert!(!exists(ws.bucket().join("2024/a.jpg")));
}

#[test]
fn test_cli_compact() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("compact")
        .assert()
        .success()
        .stdout(predicate::str::contains("Ledger compacted: 0 records"));
}
