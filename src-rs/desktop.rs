use crate::matcher::Point;
use anyhow::{anyhow, bail, Result};
use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    Click,
    Down,
    Up,
}

/// Pointer and keyboard injection.
pub trait Desktop {
    fn position(&mut self) -> Result<Point>;
    fn move_to(&mut self, point: Point) -> Result<()>;
    fn button(&mut self, button: MouseButton, press: Press) -> Result<()>;
    /// Positive scrolls up.
    fn scroll(&mut self, amount: i32) -> Result<()>;
    fn type_text(&mut self, text: &str) -> Result<()>;
    fn key(&mut self, key: &str, press: Press) -> Result<()>;

    fn pause(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub struct EnigoDesktop {
    enigo: Enigo,
}

impl EnigoDesktop {
    pub fn new() -> Result<Self> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| anyhow!("failed to initialize input backend: {e:?}"))?;
        Ok(Self { enigo })
    }
}

fn map_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
    }
}

fn map_direction(press: Press) -> Direction {
    match press {
        Press::Click => Direction::Click,
        Press::Down => Direction::Press,
        Press::Up => Direction::Release,
    }
}

pub fn map_key(key: &str) -> Result<Key> {
    let lowered = key.trim().to_lowercase();
    let mapped = match lowered.as_str() {
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "escape" | "esc" => Key::Escape,
        "backspace" => Key::Backspace,
        "control" | "ctrl" => Key::Control,
        "shift" => Key::Shift,
        "alt" | "option" => Key::Alt,
        "meta" | "command" | "cmd" | "super" | "win" | "windows" => Key::Meta,
        "delete" | "del" => Key::Delete,
        "space" => Key::Space,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" | "pgup" => Key::PageUp,
        "pagedown" | "pgdn" => Key::PageDown,
        "capslock" => Key::CapsLock,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Key::Unicode(c.to_ascii_lowercase()),
                _ => bail!("unsupported key: {key}"),
            }
        }
    };
    Ok(mapped)
}

impl Desktop for EnigoDesktop {
    fn position(&mut self) -> Result<Point> {
        let (x, y) = self
            .enigo
            .location()
            .map_err(|e| anyhow!("pointer location failed: {e:?}"))?;
        Ok(Point::new(x, y))
    }

    fn move_to(&mut self, point: Point) -> Result<()> {
        self.enigo
            .move_mouse(point.x, point.y, Coordinate::Abs)
            .map_err(|e| anyhow!("pointer move failed: {e:?}"))
    }

    fn button(&mut self, button: MouseButton, press: Press) -> Result<()> {
        self.enigo
            .button(map_button(button), map_direction(press))
            .map_err(|e| anyhow!("mouse button failed: {e:?}"))
    }

    fn scroll(&mut self, amount: i32) -> Result<()> {
        // enigo counts positive lengths downwards
        self.enigo
            .scroll(-amount, Axis::Vertical)
            .map_err(|e| anyhow!("scroll failed: {e:?}"))
    }

    fn type_text(&mut self, text: &str) -> Result<()> {
        self.enigo
            .text(text)
            .map_err(|e| anyhow!("typing failed: {e:?}"))
    }

    fn key(&mut self, key: &str, press: Press) -> Result<()> {
        let mapped = map_key(key)?;
        self.enigo
            .key(mapped, map_direction(press))
            .map_err(|e| anyhow!("key {key} failed: {e:?}"))
    }
}

/// Placeholder when no input backend could be opened; every injection fails
/// with the startup reason, pauses still sleep.
pub struct NoDesktop {
    reason: String,
}

impl NoDesktop {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> Result<T> {
        bail!("input backend unavailable: {}", self.reason)
    }
}

impl Desktop for NoDesktop {
    fn position(&mut self) -> Result<Point> {
        self.unavailable()
    }

    fn move_to(&mut self, _point: Point) -> Result<()> {
        self.unavailable()
    }

    fn button(&mut self, _button: MouseButton, _press: Press) -> Result<()> {
        self.unavailable()
    }

    fn scroll(&mut self, _amount: i32) -> Result<()> {
        self.unavailable()
    }

    fn type_text(&mut self, _text: &str) -> Result<()> {
        self.unavailable()
    }

    fn key(&mut self, _key: &str, _press: Press) -> Result<()> {
        self.unavailable()
    }
}

pub fn probe_desktop() -> Box<dyn Desktop> {
    match EnigoDesktop::new() {
        Ok(desktop) => Box::new(desktop),
        Err(err) => {
            warn!("input injection unavailable: {err:#}");
            Box::new(NoDesktop::new(format!("{err:#}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_names_map_case_insensitively() {
        assert_eq!(map_key("Enter").unwrap(), Key::Return);
        assert_eq!(map_key("ctrl").unwrap(), Key::Control);
        assert_eq!(map_key("cmd").unwrap(), Key::Meta);
        assert_eq!(map_key("F5").unwrap(), Key::F5);
        assert_eq!(map_key("A").unwrap(), Key::Unicode('a'));
        assert_eq!(map_key("/").unwrap(), Key::Unicode('/'));
    }

    #[test]
    fn unknown_multi_char_key_is_rejected() {
        let err = map_key("hyper").unwrap_err();
        assert!(err.to_string().contains("hyper"));
    }

    #[test]
    fn no_desktop_fails_every_injection() {
        let mut desktop = NoDesktop::new("headless");
        assert!(desktop.position().is_err());
        assert!(desktop.type_text("x").is_err());
        let err = desktop.key("enter", Press::Click).unwrap_err();
        assert!(err.to_string().contains("headless"));
    }

    #[test]
    fn buttons_deserialize_lowercase() {
        let button: MouseButton = serde_json::from_str("\"right\"").unwrap();
        assert_eq!(button, MouseButton::Right);
        assert_eq!(MouseButton::default(), MouseButton::Left);
    }
}
