//! Reference-image capture: crop a region around a point, save it under
//! `captures/` and register it on an element.

use crate::desktop::Desktop;
use crate::matcher::Point;
use crate::registry::{normalize_key, Element, ElementRegistry};
use crate::screen::ScreenSource;
use crate::util::timestamp_compact;
use anyhow::{bail, Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use image::{imageops, RgbaImage};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SIZE: u32 = 200;
pub const MIN_SIZE: u32 = 10;
pub const MAX_SIZE: u32 = 1000;
const SIZE_STEP: u32 = 1;
const MAX_STEM_CHARS: usize = 50;
const TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionSize {
    pub width: u32,
    pub height: u32,
}

impl Default for RegionSize {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE, DEFAULT_SIZE)
    }
}

impl RegionSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.clamp(MIN_SIZE, MAX_SIZE),
            height: height.clamp(MIN_SIZE, MAX_SIZE),
        }
    }

    /// `WxH`, e.g. `120x40`.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((w, h)) = raw.trim().split_once(['x', 'X']) else {
            bail!("size must look like WIDTHxHEIGHT, got {raw:?}");
        };
        let width = w.trim().parse().with_context(|| format!("invalid width in {raw:?}"))?;
        let height = h.trim().parse().with_context(|| format!("invalid height in {raw:?}"))?;
        Ok(Self::new(width, height))
    }

    fn widen(&mut self, grow: bool) {
        self.width = step(self.width, grow);
    }

    fn heighten(&mut self, grow: bool) {
        self.height = step(self.height, grow);
    }
}

fn step(value: u32, grow: bool) -> u32 {
    if grow {
        (value + SIZE_STEP).min(MAX_SIZE)
    } else {
        value.saturating_sub(SIZE_STEP).max(MIN_SIZE)
    }
}

/// Top-left corner and size of the region centred on `center`, shifted to
/// stay inside a `frame_w`×`frame_h` frame.
pub fn region_bounds(center: Point, size: RegionSize, frame_w: u32, frame_h: u32) -> (u32, u32, u32, u32) {
    let w = size.width.min(frame_w);
    let h = size.height.min(frame_h);
    let place = |c: i32, span: u32, limit: u32| -> u32 {
        let start = i64::from(c) - i64::from(span / 2);
        start.clamp(0, i64::from(limit - span)) as u32
    };
    (place(center.x, w, frame_w), place(center.y, h, frame_h), w, h)
}

pub fn crop_around(frame: &RgbaImage, center: Point, size: RegionSize) -> Result<RgbaImage> {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 {
        bail!("screen frame is empty");
    }
    let (x, y, w, h) = region_bounds(center, size, fw, fh);
    Ok(imageops::crop_imm(frame, x, y, w, h).to_image())
}

/// Spaces to underscores, keep word characters and `-`, at most 50 chars.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .take(MAX_STEM_CHARS)
        .collect();
    if cleaned.is_empty() {
        "capture".to_string()
    } else {
        cleaned
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureInfo {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavedCapture {
    pub file: String,
    pub path: PathBuf,
    pub center: Point,
    pub size: RegionSize,
    pub new_element: bool,
    pub element: Element,
}

/// Crop, write `<name>_<timestamp>.png` and attach it to the element.
pub fn save_capture(
    registry: &ElementRegistry,
    captures_dir: &Path,
    frame: &RgbaImage,
    center: Point,
    size: RegionSize,
    info: &CaptureInfo,
) -> Result<SavedCapture> {
    if info.name.trim().is_empty() {
        bail!("capture needs an element name");
    }
    let region = crop_around(frame, center, size)?;
    std::fs::create_dir_all(captures_dir)
        .with_context(|| format!("failed to create {}", captures_dir.display()))?;

    let file = format!("{}_{}.png", sanitize_filename(&info.name), timestamp_compact());
    let path = captures_dir.join(&file);
    region
        .save(&path)
        .with_context(|| format!("failed to write capture: {}", path.display()))?;

    let new_element = !registry.load()?.contains_key(&normalize_key(&info.name));
    let element = registry.add_image_with(&info.name, &file, &info.description, &info.tags)?;
    info!(file = %file, element = %element.name, new_element, "capture saved");

    Ok(SavedCapture {
        file,
        path,
        center,
        size: RegionSize::new(region.width(), region.height()),
        new_element,
        element,
    })
}

/// Ask for name, description and tags. An empty name cancels; an existing
/// element only gets the image appended, so its details are not asked for.
pub fn ask_capture_info<R: BufRead, W: Write>(
    input: &mut R,
    out: &mut W,
    existing: &[String],
) -> Result<Option<CaptureInfo>> {
    if !existing.is_empty() {
        writeln!(out, "Existing elements: {}", existing.join(", "))?;
    }
    let name = prompt(input, out, "Element name (empty cancels): ")?;
    if name.is_empty() {
        return Ok(None);
    }
    if existing.iter().any(|e| *e == normalize_key(&name)) {
        return Ok(Some(CaptureInfo {
            name,
            ..CaptureInfo::default()
        }));
    }
    let description = prompt(input, out, "Description: ")?;
    let tags = prompt(input, out, "Tags (comma separated): ")?
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    Ok(Some(CaptureInfo {
        name,
        description,
        tags,
    }))
}

fn prompt<R: BufRead, W: Write>(input: &mut R, out: &mut W, label: &str) -> Result<String> {
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKey {
    Resized,
    Capture,
    Reset,
    Quit,
    Ignored,
}

fn handle_key(code: KeyCode, modifiers: KeyModifiers, size: &mut RegionSize) -> SessionKey {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        return SessionKey::Quit;
    }
    match code {
        KeyCode::Char('+') | KeyCode::Char('=') => {
            size.widen(true);
            size.heighten(true);
        }
        KeyCode::Char('-') => {
            size.widen(false);
            size.heighten(false);
        }
        KeyCode::Char('x') => size.widen(true),
        KeyCode::Char('X') => size.widen(false),
        KeyCode::Char('y') => size.heighten(true),
        KeyCode::Char('Y') => size.heighten(false),
        KeyCode::Char('c') | KeyCode::Char(' ') => return SessionKey::Capture,
        KeyCode::Char('r') => {
            *size = RegionSize::default();
            return SessionKey::Reset;
        }
        KeyCode::Char('q') | KeyCode::Esc => return SessionKey::Quit,
        _ => return SessionKey::Ignored,
    }
    SessionKey::Resized
}

/// Leaves raw mode on every exit path.
struct RawMode;

impl RawMode {
    fn enter() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SessionReport {
    pub captures: Vec<SavedCapture>,
    pub final_size: Option<RegionSize>,
}

/// Interactive capture loop on the terminal. The region follows the pointer;
/// the status line and prompts go to stderr.
pub fn run_session(
    registry: &ElementRegistry,
    captures_dir: &Path,
    screen: &dyn ScreenSource,
    desktop: &mut dyn Desktop,
    initial: RegionSize,
) -> Result<SessionReport> {
    let mut size = initial;
    let mut report = SessionReport::default();
    let mut err_out = io::stderr();
    write!(
        err_out,
        "+/= grow  - shrink  x/X width  y/Y height  c/space capture  r reset  q/Esc quit\r\n"
    )?;

    let mut raw = Some(RawMode::enter()?);
    loop {
        let pos = desktop.position().unwrap_or(Point::new(0, 0));
        write!(
            err_out,
            "\r  Mouse: ({:4}, {:4}) | Region: {}x{} | Captures: {}    ",
            pos.x,
            pos.y,
            size.width,
            size.height,
            report.captures.len()
        )?;
        err_out.flush()?;

        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match handle_key(key.code, key.modifiers, &mut size) {
            SessionKey::Quit => break,
            SessionKey::Resized | SessionKey::Ignored => {}
            SessionKey::Reset => write!(err_out, "\r\nreset to {DEFAULT_SIZE}x{DEFAULT_SIZE}\r\n")?,
            SessionKey::Capture => {
                let frame = match screen.capture() {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!("capture failed: {err:#}");
                        write!(err_out, "\r\ncapture failed: {err:#}\r\n")?;
                        continue;
                    }
                };
                // prompts need cooked mode for line editing
                drop(raw.take());
                writeln!(err_out, "\ncaptured around ({}, {})", pos.x, pos.y)?;
                let existing: Vec<String> = registry.load()?.into_keys().collect();
                let stdin = io::stdin();
                let answer = ask_capture_info(&mut stdin.lock(), &mut err_out, &existing)?;
                match answer {
                    Some(info) => {
                        let saved = save_capture(registry, captures_dir, &frame, pos, size, &info)?;
                        writeln!(
                            err_out,
                            "saved {} on '{}' ({} images)",
                            saved.file,
                            saved.element.name,
                            saved.element.images.len()
                        )?;
                        report.captures.push(saved);
                    }
                    None => writeln!(err_out, "capture cancelled")?,
                }
                raw = Some(RawMode::enter()?);
            }
        }
    }
    drop(raw);
    writeln!(err_out)?;
    report.final_size = Some(size);
    Ok(report)
}
