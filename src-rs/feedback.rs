use crate::util::{command_exists, write_json_pretty};
use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;
use wait_timeout::ChildExt;

const MIN_INTERVAL: Duration = Duration::from_millis(50);
const SPAWN_GRACE: Duration = Duration::from_millis(15);
const SHORT_TYPING: [&str; 4] = [
    "type_1_short.wav",
    "type_2_short.wav",
    "type_3_short.wav",
    "type_4_short.wav",
];
const LONG_TYPING: [&str; 4] = [
    "type_5_long.wav",
    "type_6_long.wav",
    "type_7_long.wav",
    "type_8_long.wav",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Click,
    DoubleClick,
    Scroll,
    Type(usize),
    Key,
    Hotkey,
    Screenshot,
    Success,
    Error,
}

/// Best-effort side channel fired after actions that change the screen.
pub trait Feedback {
    fn cue(&self, cue: Cue);
}

#[cfg(test)]
pub struct Silent;

#[cfg(test)]
impl Feedback for Silent {
    fn cue(&self, _cue: Cue) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    0.5
}

impl Default for SoundState {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: default_volume(),
        }
    }
}

/// Plays `<cue>.wav` files through whatever system player is installed.
pub struct SoundFeedback {
    state_file: PathBuf,
    sounds_dir: PathBuf,
    state: RefCell<SoundState>,
    player: Option<&'static str>,
    last_played: Cell<Option<Instant>>,
}

impl SoundFeedback {
    pub fn open(state_file: impl Into<PathBuf>, sounds_dir: impl Into<PathBuf>) -> Self {
        let state_file = state_file.into();
        let state = read_state(&state_file);
        Self {
            state_file,
            sounds_dir: sounds_dir.into(),
            state: RefCell::new(state),
            player: detect_player(),
            last_played: Cell::new(None),
        }
    }

    pub fn state(&self) -> SoundState {
        *self.state.borrow()
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<SoundState> {
        self.state.borrow_mut().enabled = enabled;
        self.persist()?;
        if enabled {
            self.cue(Cue::Success);
        }
        Ok(self.state())
    }

    pub fn set_volume(&self, volume: f64) -> Result<SoundState> {
        self.state.borrow_mut().volume = volume.clamp(0.0, 1.0);
        self.persist()?;
        Ok(self.state())
    }

    pub fn status(&self) -> serde_json::Value {
        let state = self.state();
        serde_json::json!({
            "enabled": state.enabled,
            "volume": state.volume,
            "sounds_dir": self.sounds_dir.display().to_string(),
            "player": self.player,
            "available": self.player.is_some(),
        })
    }

    fn persist(&self) -> Result<()> {
        write_json_pretty(&self.state_file, &self.state())
            .with_context(|| format!("failed to save sound state: {}", self.state_file.display()))
    }

    fn resolve(&self, file: &str) -> Option<PathBuf> {
        let path = self.sounds_dir.join(file);
        path.exists().then_some(path)
    }

    fn play(&self, player: &str, path: &Path, volume: f64) -> Result<()> {
        let mut cmd = Command::new(player);
        match player {
            "afplay" => {
                cmd.arg("-v").arg(format!("{volume:.2}"));
            }
            "paplay" => {
                cmd.arg(format!("--volume={}", (volume * 65536.0) as u32));
            }
            _ => {
                cmd.arg("-q");
            }
        }
        let mut child = cmd
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to spawn {player}"))?;

        // Players that die instantly (bad file, no audio device) exit inside
        // the grace window; anything still running is reaped off-thread.
        match child.wait_timeout(SPAWN_GRACE)? {
            Some(status) if !status.success() => {
                debug!(player, %status, sound = %path.display(), "sound player exited early");
            }
            Some(_) => {}
            None => {
                drop(reap_in_background(child));
            }
        }
        Ok(())
    }
}

fn reap_in_background(mut child: Child) -> JoinHandle<Option<ExitStatus>> {
    thread::spawn(move || match child.wait() {
        Ok(status) => Some(status),
        Err(err) => {
            debug!("sound player wait failed: {err}");
            None
        }
    })
}

impl Feedback for SoundFeedback {
    fn cue(&self, cue: Cue) {
        let state = self.state();
        if !state.enabled {
            return;
        }
        let Some(player) = self.player else {
            return;
        };
        let now = Instant::now();
        if let Some(last) = self.last_played.get() {
            if now.duration_since(last) < MIN_INTERVAL {
                return;
            }
        }
        self.last_played.set(Some(now));

        let Some(path) = self.resolve(sound_file(cue)) else {
            debug!(?cue, "no sound file for cue");
            return;
        };
        if let Err(err) = self.play(player, &path, state.volume) {
            debug!("sound feedback failed: {err:#}");
        }
    }
}

fn sound_file(cue: Cue) -> &'static str {
    let mut rng = rand::thread_rng();
    match cue {
        Cue::Click => "click.wav",
        Cue::DoubleClick => "doubleclick.wav",
        Cue::Scroll => "scroll.wav",
        Cue::Type(0) | Cue::Key | Cue::Hotkey => "singlekeypress.wav",
        Cue::Type(len) if len < 10 => SHORT_TYPING.choose(&mut rng).copied().unwrap_or("singlekeypress.wav"),
        Cue::Type(_) => LONG_TYPING.choose(&mut rng).copied().unwrap_or("singlekeypress.wav"),
        Cue::Screenshot => "screenshot.wav",
        Cue::Success => "success.wav",
        Cue::Error => "error.wav",
    }
}

fn read_state(path: &Path) -> SoundState {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_default()
}

fn detect_player() -> Option<&'static str> {
    let candidates: &[&'static str] = if cfg!(target_os = "macos") {
        &["afplay"]
    } else {
        &["paplay", "aplay"]
    };
    candidates.iter().copied().find(|name| command_exists(name))
}
