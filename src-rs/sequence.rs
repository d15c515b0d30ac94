use crate::action::Action;
use crate::interpreter::{BatchReport, Interpreter};
use crate::util::{timestamp_iso, write_json_pretty};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PREVIEW_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Sequence {
    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }

    /// First few action labels, with a "...+N more" tail.
    pub fn preview(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .actions
            .iter()
            .take(PREVIEW_LEN)
            .map(Action::preview)
            .collect();
        if self.actions.len() > PREVIEW_LEN {
            labels.push(format!("...+{} more", self.actions.len() - PREVIEW_LEN));
        }
        labels
    }

    fn touch(&mut self) {
        self.updated = Some(timestamp_iso());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SequenceSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub actions_count: usize,
    pub actions_preview: Vec<String>,
    pub created: String,
    pub updated: Option<String>,
}

impl From<&Sequence> for SequenceSummary {
    fn from(seq: &Sequence) -> Self {
        Self {
            name: seq.name.clone(),
            display_name: seq.display_name().to_string(),
            description: seq.description.clone(),
            actions_count: seq.actions.len(),
            actions_preview: seq.preview(),
            created: seq.created.clone(),
            updated: seq.updated.clone(),
        }
    }
}

/// One `<name>.json` file per sequence.
pub struct SequenceStore {
    dir: PathBuf,
}

impl SequenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.json")))
    }

    /// Start an empty sequence. An existing file of the same name is
    /// replaced, unless it cannot be read back as a sequence.
    pub fn create(
        &self,
        name: &str,
        display_name: Option<&str>,
        description: &str,
    ) -> Result<Sequence> {
        let path = self.path_for(name)?;
        if path.exists() {
            read_sequence(&path).with_context(|| {
                format!("refusing to overwrite unreadable sequence {name}")
            })?;
            info!(sequence = name, "replacing existing sequence");
        }
        let seq = Sequence {
            name: name.to_string(),
            display_name: display_name.unwrap_or(name).to_string(),
            description: description.to_string(),
            created: timestamp_iso(),
            updated: None,
            actions: Vec::new(),
        };
        self.save(&seq)?;
        Ok(seq)
    }

    pub fn load(&self, name: &str) -> Result<Option<Sequence>> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(None);
        }
        read_sequence(&path).map(Some)
    }

    pub fn require(&self, name: &str) -> Result<Sequence> {
        match self.load(name)? {
            Some(seq) => Ok(seq),
            None => bail!("sequence not found: {name}"),
        }
    }

    pub fn save(&self, seq: &Sequence) -> Result<()> {
        let path = self.path_for(&seq.name)?;
        write_json_pretty(&path, seq)
            .with_context(|| format!("failed to save sequence {}", seq.name))
    }

    pub fn add_action(&self, name: &str, action: Action) -> Result<Sequence> {
        let mut seq = self.require(name)?;
        seq.actions.push(action);
        seq.touch();
        self.save(&seq)?;
        Ok(seq)
    }

    /// Returns the sequence and whether anything changed.
    pub fn describe(
        &self,
        name: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<(Sequence, bool)> {
        let mut seq = self.require(name)?;
        let mut changed = false;
        if let Some(display_name) = display_name.filter(|s| !s.is_empty()) {
            seq.display_name = display_name.to_string();
            changed = true;
        }
        if let Some(description) = description.filter(|s| !s.is_empty()) {
            seq.description = description.to_string();
            changed = true;
        }
        if changed {
            seq.touch();
            self.save(&seq)?;
        }
        Ok((seq, changed))
    }

    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("failed to delete {}", path.display()))?;
        Ok(true)
    }

    /// All readable sequences, sorted by name. Broken files are skipped.
    pub fn list(&self) -> Result<Vec<SequenceSummary>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            match read_sequence(&path) {
                Ok(seq) => summaries.push(SequenceSummary::from(&seq)),
                Err(err) => warn!("skipping {}: {err:#}", path.display()),
            }
        }
        Ok(summaries)
    }

    pub fn run(&self, name: &str, interpreter: &mut Interpreter) -> Result<(Sequence, BatchReport)> {
        let seq = self.require(name)?;
        info!(sequence = name, actions = seq.actions.len(), "running sequence");
        let report = interpreter.run_batch(&seq.actions);
        Ok((seq, report))
    }
}

fn read_sequence(path: &Path) -> Result<Sequence> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid sequence file {}", path.display()))
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("sequence name cannot be empty");
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        bail!("invalid sequence name: {name}");
    }
    Ok(())
}
