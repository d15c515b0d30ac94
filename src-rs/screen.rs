use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use std::path::PathBuf;
use tracing::{debug, warn};
use xcap::Monitor;

/// Anything that can hand out the current screen as pixels.
pub trait ScreenSource {
    fn capture(&self) -> Result<RgbaImage>;

    /// False when the backend was missing at startup, so lookups can report
    /// "capture unavailable" instead of "not found".
    fn is_available(&self) -> bool {
        true
    }
}

/// Primary monitor via xcap.
pub struct XcapScreen;

impl XcapScreen {
    /// Fails when no monitor can be enumerated (headless session, missing
    /// screen-recording permission, no display server).
    pub fn probe() -> Result<Self> {
        let monitors = Monitor::all().map_err(|e| anyhow!("monitor enumeration failed: {e}"))?;
        if monitors.is_empty() {
            bail!("no monitors detected");
        }
        Ok(Self)
    }

    fn primary() -> Result<Monitor> {
        let monitors = Monitor::all().map_err(|e| anyhow!("monitor enumeration failed: {e}"))?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary() {
                return Ok(monitor);
            }
            fallback.get_or_insert(monitor);
        }
        fallback.ok_or_else(|| anyhow!("no monitors detected"))
    }
}

impl ScreenSource for XcapScreen {
    fn capture(&self) -> Result<RgbaImage> {
        let monitor = Self::primary()?;
        let shot = monitor
            .capture_image()
            .map_err(|e| anyhow!("screen capture failed: {e}"))?;
        let (width, height) = (shot.width(), shot.height());
        debug!(width, height, "captured screen");
        RgbaImage::from_raw(width, height, shot.into_raw())
            .context("screen capture returned a truncated buffer")
    }
}

/// A saved screenshot standing in for the live screen.
pub struct StillFrame {
    path: PathBuf,
}

impl StillFrame {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScreenSource for StillFrame {
    fn capture(&self) -> Result<RgbaImage> {
        let img = image::open(&self.path)
            .with_context(|| format!("failed to open frame: {}", self.path.display()))?;
        Ok(img.to_rgba8())
    }
}

/// Placeholder chosen when the capture backend is missing.
pub struct NoScreen {
    reason: String,
}

impl NoScreen {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl ScreenSource for NoScreen {
    fn capture(&self) -> Result<RgbaImage> {
        bail!("screen capture unavailable: {}", self.reason)
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Probe the live capture backend once at startup.
pub fn probe_screen() -> Box<dyn ScreenSource> {
    match XcapScreen::probe() {
        Ok(screen) => Box::new(screen),
        Err(err) => {
            warn!("screen capture unavailable: {err:#}");
            Box::new(NoScreen::new(format!("{err:#}")))
        }
    }
}
