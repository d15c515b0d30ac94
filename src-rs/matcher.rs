use crate::registry::{normalize_key, ElementRegistry};
use crate::screen::ScreenSource;
use crate::template::{match_template, MatcherConfig};
use image::{DynamicImage, RgbImage, RgbaImage};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Image,
    NotFound,
    /// No capture backend at startup.
    ScreenUnavailable,
    /// The backend exists but this capture failed.
    ScreenshotError,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::NotFound => "not_found",
            Self::ScreenUnavailable => "screen_unavailable",
            Self::ScreenshotError => "screenshot_error",
        }
    }

    /// Infrastructure failure, as opposed to the element being absent.
    pub fn is_unavailable(self) -> bool {
        matches!(self, Self::ScreenUnavailable | Self::ScreenshotError)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        let dx = (other.x - self.x) as f64;
        let dy = (other.y - self.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// Center of the matched placement.
    pub x: i32,
    pub y: i32,
    pub score: f64,
    pub image: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchInfo {
    pub matches_found: usize,
    pub best_score: f64,
    pub images_tested: usize,
    pub all_matches: Vec<Candidate>,
    pub element_config: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub location: Option<Point>,
    pub method: MatchMethod,
    pub info: MatchInfo,
}

impl MatchOutcome {
    fn miss(method: MatchMethod, info: MatchInfo) -> Self {
        Self {
            location: None,
            method,
            info,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.location.is_some()
    }
}

/// Screen lookup of registry elements.
pub trait Locator {
    fn find(&self, name: &str, confidence: f64) -> MatchOutcome;
}

/// Template matching against live (or still) frames.
pub struct ImageMatcher {
    registry: ElementRegistry,
    captures_dir: PathBuf,
    screen: Rc<dyn ScreenSource>,
    config: MatcherConfig,
}

impl ImageMatcher {
    pub fn new(
        registry: ElementRegistry,
        captures_dir: impl Into<PathBuf>,
        screen: Rc<dyn ScreenSource>,
        config: MatcherConfig,
    ) -> Self {
        Self {
            registry,
            captures_dir: captures_dir.into(),
            screen,
            config,
        }
    }

    /// Reference images for `name` plus the registry key they came from.
    pub fn reference_images(&self, name: &str) -> (Vec<PathBuf>, Option<String>) {
        let element = match self.registry.get(name) {
            Ok(element) => element,
            Err(err) => {
                warn!("element registry unreadable: {err:#}");
                None
            }
        };

        let mut files = Vec::new();
        let element_config = element.map(|element| {
            for image in &element.images {
                let path = self.captures_dir.join(image);
                if path.exists() {
                    files.push(path);
                } else {
                    debug!(image = %path.display(), "registered image missing on disk");
                }
            }
            element.name
        });

        if files.is_empty() {
            files = pattern_images(&self.captures_dir, name);
        }
        (files, element_config)
    }

    /// `find`, also handing back the captured frame so callers can render
    /// the candidates over it.
    pub fn find_with_frame(&self, name: &str, confidence: f64) -> (MatchOutcome, Option<RgbaImage>) {
        let (files, element_config) = self.reference_images(name);
        let mut info = MatchInfo {
            images_tested: files.len(),
            element_config,
            ..MatchInfo::default()
        };
        if files.is_empty() {
            info!(target_name = name, "no reference images resolved");
            return (MatchOutcome::miss(MatchMethod::NotFound, info), None);
        }

        let frame = match self.screen.capture() {
            Ok(frame) => DynamicImage::ImageRgba8(frame),
            Err(err) => {
                warn!("screenshot failed: {err:#}");
                return (MatchOutcome::miss(MatchMethod::ScreenshotError, info), None);
            }
        };
        let outcome = scan_frame(&frame.to_rgb8(), &files, confidence, &self.config, &mut info);
        (outcome, Some(frame.into_rgba8()))
    }
}

impl Locator for ImageMatcher {
    fn find(&self, name: &str, confidence: f64) -> MatchOutcome {
        self.find_with_frame(name, confidence).0
    }
}

/// Stand-in picked at startup when no capture backend exists.
pub struct UnavailableLocator;

impl Locator for UnavailableLocator {
    fn find(&self, _name: &str, _confidence: f64) -> MatchOutcome {
        MatchOutcome::miss(MatchMethod::ScreenUnavailable, MatchInfo::default())
    }
}

pub fn build_locator(
    registry: ElementRegistry,
    captures_dir: &Path,
    screen: Rc<dyn ScreenSource>,
    config: MatcherConfig,
) -> Box<dyn Locator> {
    if screen.is_available() {
        Box::new(ImageMatcher::new(registry, captures_dir, screen, config))
    } else {
        Box::new(UnavailableLocator)
    }
}

fn scan_frame(
    frame: &RgbImage,
    files: &[PathBuf],
    confidence: f64,
    config: &MatcherConfig,
    info: &mut MatchInfo,
) -> MatchOutcome {
    let mut best: Option<(f64, Point)> = None;

    for path in files {
        let template = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(err) => {
                debug!(image = %path.display(), "skipping unreadable template: {err}");
                continue;
            }
        };
        let (w, h) = template.dimensions();
        let image_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let hits = match_template(frame, &template, confidence as f32, config);
        debug!(image = %image_name, hits = hits.len(), "template scanned");
        info.matches_found += hits.len();

        for hit in hits {
            let center = Point::new((hit.x + w / 2) as i32, (hit.y + h / 2) as i32);
            let score = hit.score as f64;
            info.all_matches.push(Candidate {
                x: center.x,
                y: center.y,
                score,
                image: image_name.clone(),
                width: w,
                height: h,
            });
            if best.map_or(true, |(best_score, _)| score > best_score) {
                best = Some((score, center));
            }
        }
    }

    info.all_matches
        .sort_by(|a, b| b.score.total_cmp(&a.score));
    info.best_score = best.map(|(score, _)| score).unwrap_or(0.0);

    match best {
        Some((score, location)) => {
            info!(x = location.x, y = location.y, score, "element located");
            MatchOutcome {
                location: Some(location),
                method: MatchMethod::Image,
                info: info.clone(),
            }
        }
        None => MatchOutcome::miss(MatchMethod::NotFound, info.clone()),
    }
}

/// Filename fallback when the registry has no usable images: `<name>.png`,
/// `<name>_*.png` for the normalized and the underscored spelling, then for
/// multi-word names any PNG whose name contains every word.
fn pattern_images(captures_dir: &Path, name: &str) -> Vec<PathBuf> {
    let mut pngs: Vec<String> = match fs::read_dir(captures_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|file| file.ends_with(".png"))
            .collect(),
        Err(_) => return Vec::new(),
    };
    pngs.sort();

    let normalized = normalize_key(name);
    let underscored = name.trim().replace(' ', "_");
    let mut ordered: Vec<String> = Vec::new();
    let mut push = |file: &String| {
        if !ordered.contains(file) {
            ordered.push(file.clone());
        }
    };

    for stem in [&normalized, &underscored] {
        let exact = format!("{stem}.png");
        let prefix = format!("{stem}_");
        pngs.iter().filter(|f| **f == exact).for_each(&mut push);
        pngs.iter()
            .filter(|f| f.starts_with(&prefix))
            .for_each(&mut push);
    }

    let words: Vec<&str> = normalized.split('_').filter(|w| !w.is_empty()).collect();
    if words.len() > 1 {
        pngs.iter()
            .filter(|f| {
                let lower = f.to_lowercase();
                words.iter().all(|word| lower.contains(word))
            })
            .for_each(&mut push);
    }

    ordered
        .into_iter()
        .map(|file| captures_dir.join(file))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::{NoScreen, StillFrame};
    use crate::template::tests::{blocky_image, noise_image};
    use image::{imageops, DynamicImage};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        registry: ElementRegistry,
        captures: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let captures = dir.path().join("captures");
        fs::create_dir_all(&captures).unwrap();
        let registry = ElementRegistry::new(dir.path().join("elements.json"));
        Fixture {
            dir,
            registry,
            captures,
        }
    }

    fn save_frame(fx: &Fixture, frame: &RgbImage) -> Rc<dyn ScreenSource> {
        let path = fx.dir.path().join("screen.png");
        DynamicImage::ImageRgb8(frame.clone()).save(&path).unwrap();
        Rc::new(StillFrame::new(path))
    }

    #[test]
    fn registry_scenario_finds_save_button_center() {
        let fx = fixture();
        let screen = noise_image(260, 400, 21);
        let (tw, th) = (20, 16);
        let (left, top) = (120 - tw / 2, 340 - th / 2);
        imageops::crop_imm(&screen, left, top, tw, th)
            .to_image()
            .save(fx.captures.join("save.png"))
            .unwrap();
        fs::write(
            fx.registry.path(),
            r#"{"save_button": {"name": "save_button", "description": "", "images": ["save.png"], "tags": ["ui"]}}"#,
        )
        .unwrap();

        let matcher = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            save_frame(&fx, &screen),
            MatcherConfig::default(),
        );
        let outcome = matcher.find("save button", 0.8);

        assert_eq!(outcome.method, MatchMethod::Image);
        let location = outcome.location.unwrap();
        assert!((location.x - 120).abs() <= (tw / 2) as i32);
        assert!((location.y - 340).abs() <= (th / 2) as i32);
        assert!(outcome.info.best_score >= 0.8);
        assert_eq!(outcome.info.images_tested, 1);
        assert_eq!(outcome.info.element_config.as_deref(), Some("save_button"));
        assert_eq!(outcome.info.all_matches[0].image, "save.png");
    }

    #[test]
    fn locator_finds_textured_element_off_the_block_grid() {
        let fx = fixture();
        let screen = noise_image(320, 240, 8);
        imageops::crop_imm(&screen, 142, 90, 32, 32)
            .to_image()
            .save(fx.captures.join("avatar.png"))
            .unwrap();
        fx.registry
            .add_or_update("avatar", "", &["avatar.png".to_string()], &[])
            .unwrap();

        let locator = build_locator(
            fx.registry.clone(),
            &fx.captures,
            save_frame(&fx, &screen),
            MatcherConfig::default(),
        );
        let outcome = locator.find("avatar", 0.8);
        assert_eq!(outcome.method, MatchMethod::Image);
        assert_eq!(outcome.location, Some(Point::new(158, 106)));
        assert!(outcome.info.best_score > 0.999);
    }

    #[test]
    fn absent_template_reports_not_found() {
        let fx = fixture();
        noise_image(12, 12, 99)
            .save(fx.captures.join("ghost.png"))
            .unwrap();
        let matcher = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            save_frame(&fx, &noise_image(100, 80, 5)),
            MatcherConfig::default(),
        );
        let outcome = matcher.find("ghost", 0.8);
        assert_eq!(outcome.location, None);
        assert_eq!(outcome.method, MatchMethod::NotFound);
        assert_eq!(outcome.info.matches_found, 0);
        assert_eq!(outcome.info.images_tested, 1);
    }

    #[test]
    fn unknown_name_tests_no_images() {
        let fx = fixture();
        let matcher = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            Rc::new(NoScreen::new("never captured")),
            MatcherConfig::default(),
        );
        let outcome = matcher.find("nothing here", 0.8);
        assert_eq!(outcome.method, MatchMethod::NotFound);
        assert_eq!(outcome.info.images_tested, 0);
    }

    #[test]
    fn capture_failure_is_distinct_from_not_found() {
        let fx = fixture();
        noise_image(8, 8, 1).save(fx.captures.join("icon.png")).unwrap();
        let matcher = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            Rc::new(StillFrame::new(fx.dir.path().join("missing.png"))),
            MatcherConfig::default(),
        );
        let outcome = matcher.find("icon", 0.8);
        assert_eq!(outcome.method, MatchMethod::ScreenshotError);
        assert!(outcome.method.is_unavailable());
    }

    #[test]
    fn frame_comes_back_with_the_outcome() {
        let fx = fixture();
        let screen = noise_image(120, 90, 4);
        imageops::crop_imm(&screen, 50, 30, 16, 16)
            .to_image()
            .save(fx.captures.join("badge.png"))
            .unwrap();
        let matcher = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            save_frame(&fx, &screen),
            MatcherConfig::default(),
        );
        let (outcome, frame) = matcher.find_with_frame("badge", 0.9);
        assert_eq!(outcome.location, Some(Point::new(58, 38)));
        assert_eq!(frame.map(|f| f.dimensions()), Some((120, 90)));

        let broken = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            Rc::new(StillFrame::new(fx.dir.path().join("gone.png"))),
            MatcherConfig::default(),
        );
        let (outcome, frame) = broken.find_with_frame("badge", 0.9);
        assert_eq!(outcome.method, MatchMethod::ScreenshotError);
        assert!(frame.is_none());
    }

    #[test]
    fn build_locator_picks_unavailable_strategy() {
        let fx = fixture();
        let locator = build_locator(
            fx.registry.clone(),
            &fx.captures,
            Rc::new(NoScreen::new("headless")),
            MatcherConfig::default(),
        );
        let outcome = locator.find("anything", 0.8);
        assert_eq!(outcome.method, MatchMethod::ScreenUnavailable);
        assert!(!outcome.is_visible());
    }

    #[test]
    fn best_match_wins_across_templates_and_candidates_are_ranked() {
        let fx = fixture();
        let screen = blocky_image(200, 120, 3);
        imageops::crop_imm(&screen, 30, 40, 16, 16)
            .to_image()
            .save(fx.captures.join("tab_a.png"))
            .unwrap();
        let mut dimmed = imageops::crop_imm(&screen, 140, 60, 16, 16).to_image();
        for (i, pixel) in dimmed.pixels_mut().enumerate() {
            if i % 7 == 0 {
                pixel.0 = [0, 0, 0];
            }
        }
        dimmed.save(fx.captures.join("tab_b.png")).unwrap();

        let matcher = ImageMatcher::new(
            fx.registry.clone(),
            &fx.captures,
            save_frame(&fx, &screen),
            MatcherConfig::default(),
        );
        let outcome = matcher.find("tab", 0.5);
        assert_eq!(outcome.location, Some(Point::new(38, 48)));
        let scores: Vec<f64> = outcome.info.all_matches.iter().map(|c| c.score).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(outcome.info.best_score, scores[0]);
        assert!(outcome
            .info
            .all_matches
            .iter()
            .any(|c| c.image == "tab_b.png"));
    }

    #[test]
    fn pattern_fallback_orders_and_dedupes() {
        let dir = tempdir().unwrap();
        for file in [
            "save_button.png",
            "save_button_20240101_120000.png",
            "button_save_alt.png",
            "Save_Button.png",
            "unrelated.png",
            "save_button.txt",
        ] {
            fs::write(dir.path().join(file), b"x").unwrap();
        }
        let found: Vec<String> = pattern_images(dir.path(), "Save Button")
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            found,
            vec![
                "save_button.png",
                "save_button_20240101_120000.png",
                "Save_Button.png",
                "button_save_alt.png",
            ]
        );
    }

    #[test]
    fn unavailable_methods_are_flagged() {
        assert!(MatchMethod::ScreenUnavailable.is_unavailable());
        assert!(!MatchMethod::NotFound.is_unavailable());
        assert_eq!(MatchMethod::NotFound.as_str(), "not_found");
    }
}
