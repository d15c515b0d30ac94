use crate::util::{copy_if_missing, write_json_pretty};
use anyhow::{Context, Result};
use serde_json::json;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const PLUGIN_ROOT: &str = env!("CARGO_MANIFEST_DIR");

/// On-disk layout of the agent's runtime data.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
    pub elements_file: PathBuf,
    pub captures_dir: PathBuf,
    pub sequences_dir: PathBuf,
    pub sounds_state_file: PathBuf,
    pub sounds_dir: PathBuf,
}

impl DataPaths {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let sounds_dir = env::var("MACRO_AGENT_SOUNDS_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join("sounds"));
        Self {
            elements_file: root.join("elements.json"),
            captures_dir: root.join("captures"),
            sequences_dir: root.join("sequences"),
            sounds_state_file: root.join("sounds_state.json"),
            sounds_dir,
            root,
        }
    }

    /// `--data-dir`, then `MACRO_AGENT_DATA_DIR`, then `.macro-agent`.
    pub fn resolve(flag: Option<&Path>) -> Self {
        let root = flag
            .map(Path::to_path_buf)
            .or_else(|| {
                env::var("MACRO_AGENT_DATA_DIR")
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| PathBuf::from(".macro-agent"));
        Self::at(root)
    }

    /// Create the directory layout and seed it from the packaged examples.
    pub fn ensure_layout(&self) -> Result<()> {
        self.ensure_layout_from(&Path::new(PLUGIN_ROOT).join("data").join("examples"))
    }

    fn ensure_layout_from(&self, seed_dir: &Path) -> Result<()> {
        for dir in [&self.captures_dir, &self.sequences_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create data directory: {}", dir.display()))?;
        }

        if copy_if_missing(&seed_dir.join("elements.json"), &self.elements_file)? {
            debug!(path = %self.elements_file.display(), "seeded element registry");
        } else if !self.elements_file.exists() {
            write_json_pretty(&self.elements_file, &json!({}))?;
        }

        let seed_sequences = seed_dir.join("sequences");
        if seed_sequences.is_dir() && !has_json_files(&self.sequences_dir)? {
            for entry in fs::read_dir(&seed_sequences)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    if let Some(file_name) = path.file_name() {
                        copy_if_missing(&path, &self.sequences_dir.join(file_name))?;
                    }
                }
            }
        }

        if !self.sounds_state_file.exists() {
            write_json_pretty(
                &self.sounds_state_file,
                &json!({"enabled": false, "volume": 0.5}),
            )?;
        }
        Ok(())
    }
}

fn has_json_files(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    for entry in fs::read_dir(dir)? {
        if entry?.path().extension().and_then(|e| e.to_str()) == Some("json") {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn layout_creates_defaults_without_seed() {
        let dir = tempdir().unwrap();
        let paths = DataPaths::at(dir.path().join("data"));
        paths
            .ensure_layout_from(&dir.path().join("missing-seed"))
            .unwrap();

        assert!(paths.captures_dir.is_dir());
        assert!(paths.sequences_dir.is_dir());
        assert_eq!(fs::read_to_string(&paths.elements_file).unwrap().trim(), "{}");
        assert!(paths.sounds_state_file.exists());
    }

    #[test]
    fn layout_seeds_sequences_only_into_empty_dir() {
        let dir = tempdir().unwrap();
        let seed = dir.path().join("seed");
        fs::create_dir_all(seed.join("sequences")).unwrap();
        fs::write(seed.join("elements.json"), r#"{"ok": {"name": "ok"}}"#).unwrap();
        fs::write(seed.join("sequences").join("demo.json"), "{}").unwrap();

        let paths = DataPaths::at(dir.path().join("data"));
        fs::create_dir_all(&paths.sequences_dir).unwrap();
        fs::write(paths.sequences_dir.join("mine.json"), "{}").unwrap();
        paths.ensure_layout_from(&seed).unwrap();

        assert!(!paths.sequences_dir.join("demo.json").exists());
        assert!(fs::read_to_string(&paths.elements_file)
            .unwrap()
            .contains("\"ok\""));
    }
}
