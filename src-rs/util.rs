use anyhow::{Context, Result};
use chrono::{Local, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Serialize `value` as pretty JSON and replace `path` with it.
///
/// The document is written to a sibling temp file first and renamed over the
/// target, so a crash mid-write never leaves a truncated file behind.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw).with_context(|| format!("failed to write JSON: {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => fs::create_dir_all(dir)
            .with_context(|| format!("cannot create directory {}", dir.display())),
        None => Ok(()),
    }
}

pub fn copy_if_missing(src: &Path, dst: &Path) -> Result<bool> {
    if !src.exists() || dst.exists() {
        return Ok(false);
    }
    ensure_parent_dir(dst)?;
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} -> {}", src.display(), dst.display()))?;
    Ok(true)
}

/// Absolute form of `path` for JSON output; falls back to the input as given.
pub fn abs_path(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

pub fn timestamp_iso() -> String {
    Local::now().to_rfc3339()
}

/// `20240131_142501`, used in capture filenames.
pub fn timestamp_compact() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

pub fn unix_seconds() -> i64 {
    Utc::now().timestamp()
}

/// Scores are reported to `places` decimals.
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{value:.places$}").parse().unwrap_or(value)
}

pub fn command_exists(name: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {name} >/dev/null 2>&1"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_pretty_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("a").join("b.json");
        write_json_pretty(&target, &json!({"ok": true})).unwrap();
        assert!(target.exists());
        assert!(!dir.path().join("a").join("b.json.tmp").exists());
        let raw = fs::read_to_string(&target).unwrap();
        assert!(raw.contains("\"ok\": true"));
    }

    #[test]
    fn copy_if_missing_keeps_existing_target() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.json");
        let dst = dir.path().join("dst.json");
        fs::write(&src, "new").unwrap();
        fs::write(&dst, "old").unwrap();
        assert!(!copy_if_missing(&src, &dst).unwrap());
        assert_eq!(fs::read_to_string(&dst).unwrap(), "old");
    }

    #[test]
    fn round_to_keeps_requested_places() {
        assert_eq!(round_to(0.987_654, 3), 0.988);
        assert_eq!(round_to(0.123_44, 4), 0.1234);
    }

    #[test]
    fn abs_path_anchors_relative_paths() {
        let rel = abs_path(Path::new("captures/a.png"));
        assert!(rel.is_absolute());
        assert!(rel.ends_with("captures/a.png"));
        assert_eq!(abs_path(Path::new("/tmp/x")), PathBuf::from("/tmp/x"));
    }
}
