use crate::action::{Action, Conditional};
use crate::desktop::{Desktop, MouseButton, Press};
use crate::feedback::{Cue, Feedback};
use crate::matcher::{Locator, MatchOutcome, Point};
use crate::motion::{plan_path, MotionConfig, MAX_MOVE_SECS};
use crate::screen::ScreenSource;
use crate::util::unix_seconds;
use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const APPROACH_MOVE: Duration = Duration::from_millis(300);
const SETTLE: Duration = Duration::from_millis(100);
const DRAG_GRIP: Duration = Duration::from_millis(50);
const DOUBLE_CLICK_GAP: Duration = Duration::from_millis(40);
const NEWLINE_SETTLE: Duration = Duration::from_millis(100);
const CLICK_MOVE: Duration = Duration::from_millis(500);

/// How a conditional treats a matcher that cannot look at the screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VisionPolicy {
    /// Unavailable reads as "not visible".
    #[default]
    Lenient,
    /// Unavailable fails the conditional step and stops the batch.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl StepResult {
    fn ok(action: &str, details: Map<String, Value>) -> Self {
        Self {
            action: action.to_string(),
            success: true,
            step: None,
            branch: None,
            error: None,
            details,
        }
    }

    fn failed(action: &str, error: String, details: Map<String, Value>) -> Self {
        Self {
            action: action.to_string(),
            success: false,
            step: None,
            branch: None,
            error: Some(error),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    pub halted: bool,
    pub results: Vec<StepResult>,
}

impl BatchReport {
    pub fn success(&self) -> bool {
        !self.halted
    }
}

/// Executes actions one at a time against the screen, pointer and keyboard.
pub struct Interpreter {
    locator: Box<dyn Locator>,
    screen: Rc<dyn ScreenSource>,
    desktop: Box<dyn Desktop>,
    feedback: Box<dyn Feedback>,
    captures_dir: PathBuf,
    motion: MotionConfig,
    rng: StdRng,
    policy: VisionPolicy,
}

impl Interpreter {
    pub fn new(
        locator: Box<dyn Locator>,
        screen: Rc<dyn ScreenSource>,
        desktop: Box<dyn Desktop>,
        feedback: Box<dyn Feedback>,
        captures_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            locator,
            screen,
            desktop,
            feedback,
            captures_dir: captures_dir.into(),
            motion: MotionConfig::default(),
            rng: StdRng::from_entropy(),
            policy: VisionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: VisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[cfg(test)]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Run one action. Conditionals are evaluated here without running their
    /// branches; `run_batch` walks the branches.
    pub fn execute(&mut self, action: &Action) -> StepResult {
        if let Action::IfVisible(cond) | Action::IfNotVisible(cond) = action {
            let (result, _) = self.evaluate(action, cond);
            return result;
        }

        let tag = action.tag();
        let mut details = Map::new();
        match self.perform(action, &mut details) {
            Ok(()) => StepResult::ok(tag, details),
            Err(err) => {
                warn!(action = tag, "action failed: {err:#}");
                self.feedback.cue(Cue::Error);
                StepResult::failed(tag, format!("{err:#}"), details)
            }
        }
    }

    /// Run actions in order, stopping at the first failed step. A conditional
    /// step succeeds on its own; a failure inside the taken branch stops the
    /// whole batch.
    pub fn run_batch(&mut self, actions: &[Action]) -> BatchReport {
        let mut results = Vec::new();
        let halted = self.run_list(actions, None, None, &mut results);
        let completed = results.iter().filter(|r| r.success).count();
        info!(total = actions.len(), completed, halted, "batch finished");
        BatchReport {
            total: actions.len(),
            completed,
            halted,
            results,
        }
    }

    /// Returns true when the list halted on a failure.
    fn run_list(
        &mut self,
        actions: &[Action],
        step: Option<usize>,
        branch: Option<&'static str>,
        results: &mut Vec<StepResult>,
    ) -> bool {
        for (index, action) in actions.iter().enumerate() {
            let step_no = step.unwrap_or(index + 1);
            match action {
                Action::IfVisible(cond) | Action::IfNotVisible(cond) => {
                    let (mut result, taken) = self.evaluate(action, cond);
                    result.step = Some(step_no);
                    let passed = result.success;
                    results.push(result);
                    let Some(taken) = taken.filter(|_| passed) else {
                        return true;
                    };
                    let branch_actions = if taken == "then" {
                        &cond.then
                    } else {
                        &cond.otherwise
                    };
                    debug!(target_name = %cond.target, branch = taken, steps = branch_actions.len(), "taking branch");
                    if self.run_list(branch_actions, Some(step_no), Some(taken), results) {
                        return true;
                    }
                }
                _ => {
                    let mut result = self.execute(action);
                    result.step = Some(step_no);
                    result.branch = branch;
                    let passed = result.success;
                    results.push(result);
                    if !passed {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Visibility check with no pointer side effect. Returns the branch to
    /// take, or `None` under the strict policy when the matcher cannot see.
    fn evaluate(&mut self, action: &Action, cond: &Conditional) -> (StepResult, Option<&'static str>) {
        let tag = action.tag();
        let outcome = self.locator.find(&cond.target, cond.confidence);
        let visible = outcome.is_visible();
        let mut details = Map::new();
        details.insert("target".into(), json!(cond.target));
        details.insert("visible".into(), json!(visible));
        details.insert("method".into(), json!(outcome.method.as_str()));
        details.insert("match_info".into(), info_value(&outcome));

        if self.policy == VisionPolicy::Strict && outcome.method.is_unavailable() {
            let error = format!(
                "cannot evaluate {tag} for {}: screen matching {}",
                cond.target,
                outcome.method.as_str()
            );
            warn!("{error}");
            return (StepResult::failed(tag, error, details), None);
        }

        let condition_met = match action {
            Action::IfNotVisible(_) => !visible,
            _ => visible,
        };
        let taken = if condition_met { "then" } else { "else" };
        details.insert("condition_met".into(), json!(condition_met));
        let mut result = StepResult::ok(tag, details);
        result.branch = Some(taken);
        (result, Some(taken))
    }

    fn perform(&mut self, action: &Action, details: &mut Map<String, Value>) -> Result<()> {
        match action {
            Action::Move { x, y, duration } => {
                let target = Point::new(*x, *y);
                self.move_smooth(target, move_seconds(*duration)?)?;
                details.insert("coordinates".into(), point_value(target));
            }
            Action::MoveTo {
                target,
                confidence,
                duration,
            } => {
                let nominal = move_seconds(*duration)?;
                let location = self.resolve(target, *confidence, details)?;
                self.move_smooth(location, nominal)?;
            }
            Action::Click { x, y, button } => {
                self.approach(*x, *y, CLICK_MOVE, details)?;
                self.desktop.button(*button, Press::Click)?;
                self.feedback.cue(Cue::Click);
                details.insert("button".into(), json!(button));
            }
            Action::ClickOn {
                target,
                confidence,
                button,
            } => {
                let location = self.resolve(target, *confidence, details)?;
                self.move_smooth(location, CLICK_MOVE)?;
                self.desktop.button(*button, Press::Click)?;
                self.feedback.cue(Cue::Click);
                details.insert("button".into(), json!(button));
            }
            Action::DoubleClick { x, y } => {
                self.approach(*x, *y, CLICK_MOVE, details)?;
                self.desktop.button(MouseButton::Left, Press::Click)?;
                self.desktop.pause(DOUBLE_CLICK_GAP);
                self.desktop.button(MouseButton::Left, Press::Click)?;
                self.feedback.cue(Cue::DoubleClick);
            }
            Action::RightClick { x, y } => {
                self.approach(*x, *y, CLICK_MOVE, details)?;
                self.desktop.button(MouseButton::Right, Press::Click)?;
                self.feedback.cue(Cue::Click);
            }
            Action::Drag {
                x1,
                y1,
                x2,
                y2,
                duration,
            } => {
                let (from, to) = (Point::new(*x1, *y1), Point::new(*x2, *y2));
                let nominal = move_seconds(*duration)?;
                self.move_smooth(from, APPROACH_MOVE)?;
                self.desktop.pause(SETTLE);
                self.desktop.button(MouseButton::Left, Press::Down)?;
                self.desktop.pause(DRAG_GRIP);
                let dragged = self.move_smooth(to, nominal);
                self.desktop.pause(DRAG_GRIP);
                // release even when the drag leg failed
                let released = self.desktop.button(MouseButton::Left, Press::Up);
                dragged?;
                released?;
                details.insert("from".into(), point_value(from));
                details.insert("to".into(), point_value(to));
            }
            Action::Scroll { amount, x, y } => {
                if x.is_some() || y.is_some() {
                    self.approach(*x, *y, APPROACH_MOVE, details)?;
                    self.desktop.pause(SETTLE);
                }
                self.desktop.scroll(*amount)?;
                self.feedback.cue(Cue::Scroll);
                details.insert("amount".into(), json!(amount));
            }
            Action::Write { text, interval } => {
                let pause = seconds(*interval, "interval")?;
                let plain = strip_diacritics(text);
                self.type_lines(&plain, pause)?;
                self.feedback.cue(Cue::Type(plain.chars().count()));
                details.insert("text".into(), json!(plain));
            }
            Action::Press { key } => {
                self.desktop.key(key, Press::Click)?;
                self.feedback.cue(Cue::Key);
                details.insert("key".into(), json!(key));
            }
            Action::Hotkey { keys } => {
                self.hotkey(keys)?;
                self.feedback.cue(Cue::Hotkey);
                details.insert("keys".into(), json!(keys));
            }
            Action::Wait { seconds: secs } => {
                self.desktop.pause(seconds(*secs, "seconds")?);
                details.insert("seconds".into(), json!(secs));
            }
            Action::Screenshot { filename } => {
                let shot = self.screenshot(filename.as_deref())?;
                self.feedback.cue(Cue::Screenshot);
                details.extend(shot);
            }
            Action::IfVisible(_) | Action::IfNotVisible(_) => {
                bail!("conditionals run through the batch runner")
            }
        }
        Ok(())
    }

    /// Locate `target` on screen, recording the diagnostics either way.
    fn resolve(
        &mut self,
        target: &str,
        confidence: f64,
        details: &mut Map<String, Value>,
    ) -> Result<Point> {
        let outcome = self.locator.find(target, confidence);
        details.insert("target".into(), json!(target));
        details.insert("method".into(), json!(outcome.method.as_str()));
        details.insert("match_info".into(), info_value(&outcome));
        match outcome.location {
            Some(location) => {
                details.insert("coordinates".into(), point_value(location));
                Ok(location)
            }
            None if outcome.method.is_unavailable() => bail!(
                "cannot look for {target}: screen matching {}",
                outcome.method.as_str()
            ),
            None => bail!("element not found: {target}"),
        }
    }

    /// Move to explicit coordinates when both are given; a click with no
    /// coordinates acts at the current pointer position.
    fn approach(
        &mut self,
        x: Option<i32>,
        y: Option<i32>,
        nominal: Duration,
        details: &mut Map<String, Value>,
    ) -> Result<()> {
        details.insert("coordinates".into(), json!({ "x": x, "y": y }));
        match (x, y) {
            (Some(x), Some(y)) => self.move_smooth(Point::new(x, y), nominal),
            (None, None) => Ok(()),
            _ => bail!("coordinates need both x and y"),
        }
    }

    fn move_smooth(&mut self, target: Point, nominal: Duration) -> Result<()> {
        let start = self.desktop.position()?;
        let plan = plan_path(start, target, nominal, &self.motion, &mut self.rng);
        debug!(
            from_x = start.x,
            from_y = start.y,
            to_x = target.x,
            to_y = target.y,
            steps = plan.steps.len(),
            overshoot = plan.overshoot,
            "moving pointer"
        );
        for step in &plan.steps {
            self.desktop.move_to(step.point)?;
            if !step.pause.is_zero() {
                self.desktop.pause(step.pause);
            }
        }
        Ok(())
    }

    /// Newlines become shift+enter so chat-style inputs do not submit.
    fn type_lines(&mut self, text: &str, interval: Duration) -> Result<()> {
        for (index, line) in text.split('\n').enumerate() {
            if index > 0 {
                self.desktop.key("shift", Press::Down)?;
                let entered = self.desktop.key("enter", Press::Click);
                self.desktop.key("shift", Press::Up)?;
                entered?;
                self.desktop.pause(NEWLINE_SETTLE);
            }
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                continue;
            }
            if interval.is_zero() {
                self.desktop.type_text(line)?;
            } else {
                let mut buf = [0u8; 4];
                for ch in line.chars() {
                    self.desktop.type_text(ch.encode_utf8(&mut buf))?;
                    self.desktop.pause(interval);
                }
            }
        }
        Ok(())
    }

    /// Press in order, release in reverse. Keys already down are released
    /// when a later key fails.
    fn hotkey(&mut self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            bail!("hotkey needs at least one key");
        }
        let mut held: Vec<&str> = Vec::with_capacity(keys.len());
        let mut failure = None;
        for key in keys {
            match self.desktop.key(key, Press::Down) {
                Ok(()) => held.push(key),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
        for key in held.iter().rev() {
            if let Err(err) = self.desktop.key(key, Press::Up) {
                failure.get_or_insert(err);
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn screenshot(&mut self, filename: Option<&str>) -> Result<Map<String, Value>> {
        let frame = self.screen.capture()?;
        let (width, height) = frame.dimensions();
        let stem = match filename {
            Some(name) => name.trim_end_matches(".png").to_string(),
            None => format!("screenshot_{}", unix_seconds()),
        };
        if stem.is_empty() || stem.contains(['/', '\\']) {
            bail!("invalid screenshot name: {stem:?}");
        }
        fs::create_dir_all(&self.captures_dir).with_context(|| {
            format!("failed to create {}", self.captures_dir.display())
        })?;
        let path = self.captures_dir.join(format!("{stem}.png"));

        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(frame)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| anyhow!("failed to encode screenshot: {e}"))?;
        fs::write(&path, &bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), width, height, "screenshot saved");

        let mut details = Map::new();
        details.insert("filepath".into(), json!(path.display().to_string()));
        details.insert("width".into(), json!(width));
        details.insert("height".into(), json!(height));
        details.insert("image_base64".into(), json!(BASE64_STANDARD.encode(&bytes)));
        Ok(details)
    }
}

fn seconds(value: f64, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| anyhow!("invalid {field}: {value}"))
}

fn move_seconds(value: f64) -> Result<Duration> {
    if value > MAX_MOVE_SECS {
        bail!("invalid duration: {value} (pointer moves take at most {MAX_MOVE_SECS}s)");
    }
    seconds(value, "duration")
}

fn point_value(point: Point) -> Value {
    json!({ "x": point.x, "y": point.y })
}

fn info_value(outcome: &MatchOutcome) -> Value {
    serde_json::to_value(&outcome.info).unwrap_or(Value::Null)
}

/// Decompose and drop combining marks: "canción" types as "cancion".
pub fn strip_diacritics(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::feedback::Silent;
    use crate::matcher::{MatchInfo, MatchMethod, UnavailableLocator};
    use image::{Rgba, RgbaImage};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::tempdir;

    /// Records every injected event; pauses return immediately.
    pub(crate) struct RecordingDesktop {
        pub log: Rc<RefCell<Vec<String>>>,
        pub pos: Point,
    }

    impl RecordingDesktop {
        pub(crate) fn new() -> (Self, Rc<RefCell<Vec<String>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            (
                Self {
                    log: Rc::clone(&log),
                    pos: Point::new(0, 0),
                },
                log,
            )
        }
    }

    impl Desktop for RecordingDesktop {
        fn position(&mut self) -> Result<Point> {
            Ok(self.pos)
        }

        fn move_to(&mut self, point: Point) -> Result<()> {
            self.pos = point;
            self.log.borrow_mut().push(format!("move:{},{}", point.x, point.y));
            Ok(())
        }

        fn button(&mut self, button: MouseButton, press: Press) -> Result<()> {
            self.log
                .borrow_mut()
                .push(format!("button:{button:?}:{press:?}").to_lowercase());
            Ok(())
        }

        fn scroll(&mut self, amount: i32) -> Result<()> {
            self.log.borrow_mut().push(format!("scroll:{amount}"));
            Ok(())
        }

        fn type_text(&mut self, text: &str) -> Result<()> {
            self.log.borrow_mut().push(format!("text:{text}"));
            Ok(())
        }

        fn key(&mut self, key: &str, press: Press) -> Result<()> {
            if key == "bogus" {
                bail!("unsupported key: {key}");
            }
            self.log
                .borrow_mut()
                .push(format!("key:{key}:{press:?}").to_lowercase());
            Ok(())
        }

        fn pause(&mut self, _duration: Duration) {}
    }

    /// Elements listed here are "on screen" at the given point.
    pub(crate) struct FixedLocator(pub HashMap<String, Point>);

    impl Locator for FixedLocator {
        fn find(&self, name: &str, confidence: f64) -> MatchOutcome {
            match self.0.get(name) {
                Some(point) => MatchOutcome {
                    location: Some(*point),
                    method: MatchMethod::Image,
                    info: MatchInfo {
                        matches_found: 1,
                        best_score: confidence.max(0.99),
                        images_tested: 1,
                        ..MatchInfo::default()
                    },
                },
                None => MatchOutcome {
                    location: None,
                    method: MatchMethod::NotFound,
                    info: MatchInfo::default(),
                },
            }
        }
    }

    struct GreyScreen;

    impl ScreenSource for GreyScreen {
        fn capture(&self) -> Result<RgbaImage> {
            Ok(RgbaImage::from_pixel(8, 6, Rgba([90, 90, 90, 255])))
        }
    }

    pub(crate) fn interpreter_with(
        visible: &[(&str, Point)],
        captures: &std::path::Path,
    ) -> (Interpreter, Rc<RefCell<Vec<String>>>) {
        let (desktop, log) = RecordingDesktop::new();
        let locator = FixedLocator(
            visible
                .iter()
                .map(|(name, point)| (name.to_string(), *point))
                .collect(),
        );
        let interp = Interpreter::new(
            Box::new(locator),
            Rc::new(GreyScreen),
            Box::new(desktop),
            Box::new(Silent),
            captures,
        )
        .with_seed(7);
        (interp, log)
    }

    fn write(text: &str) -> Action {
        Action::Write {
            text: text.to_string(),
            interval: 0.0,
        }
    }

    #[test]
    fn batch_stops_after_first_failure() {
        let dir = tempdir().unwrap();
        let (mut interp, _) = interpreter_with(&[], dir.path());
        let actions = vec![
            Action::Wait { seconds: 0.0 },
            Action::ClickOn {
                target: "ghost".to_string(),
                confidence: 0.8,
                button: MouseButton::Left,
            },
            Action::Wait { seconds: 0.0 },
        ];
        let report = interp.run_batch(&actions);
        assert_eq!(report.results.len(), 2);
        assert!(report.halted);
        assert_eq!(report.completed, 1);
        let failed = &report.results[1];
        assert_eq!(failed.step, Some(2));
        assert_eq!(failed.error.as_deref(), Some("element not found: ghost"));
        assert_eq!(failed.details["method"], "not_found");
        assert_eq!(failed.details["match_info"]["matches_found"], 0);
    }

    #[test]
    fn click_on_moves_to_the_match_then_clicks() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[("save", Point::new(120, 340))], dir.path());
        let result = interp.execute(&Action::ClickOn {
            target: "save".to_string(),
            confidence: 0.8,
            button: MouseButton::Left,
        });
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.details["coordinates"], json!({"x": 120, "y": 340}));
        assert_eq!(result.details["method"], "image");

        let log = log.borrow();
        assert_eq!(log[log.len() - 2], "move:120,340");
        assert_eq!(log[log.len() - 1], "button:left:click");
    }

    #[test]
    fn unresolved_click_never_clicks() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::ClickOn {
            target: "missing".to_string(),
            confidence: 0.8,
            button: MouseButton::Left,
        });
        assert!(!result.success);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn if_visible_runs_only_the_then_branch() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[("dialog", Point::new(5, 5))], dir.path());
        let action = Action::IfVisible(Conditional {
            target: "dialog".to_string(),
            confidence: 0.8,
            then: vec![write("x")],
            otherwise: vec![write("y")],
        });
        let report = interp.run_batch(&[action]);
        assert!(!report.halted);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[0].branch, Some("then"));
        assert_eq!(report.results[0].details["condition_met"], true);
        assert_eq!(report.results[1].branch, Some("then"));
        assert_eq!(report.results[1].step, Some(1));
        assert_eq!(*log.borrow(), vec!["text:x".to_string()]);
    }

    #[test]
    fn if_not_visible_takes_else_when_present() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[("popup", Point::new(1, 1))], dir.path());
        let action = Action::IfNotVisible(Conditional {
            target: "popup".to_string(),
            confidence: 0.8,
            then: vec![write("absent")],
            otherwise: vec![write("present")],
        });
        let report = interp.run_batch(&[action]);
        assert_eq!(report.results[0].branch, Some("else"));
        assert_eq!(*log.borrow(), vec!["text:present".to_string()]);
    }

    #[test]
    fn failing_branch_action_stops_the_outer_batch() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let actions = vec![
            Action::IfVisible(Conditional {
                target: "nothing".to_string(),
                confidence: 0.8,
                then: vec![],
                otherwise: vec![Action::Press {
                    key: "bogus".to_string(),
                }],
            }),
            write("never"),
        ];
        let report = interp.run_batch(&actions);
        assert!(report.halted);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].branch, Some("else"));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn nested_conditionals_recurse() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[("a", Point::new(1, 1))], dir.path());
        let inner = Action::IfNotVisible(Conditional {
            target: "b".to_string(),
            confidence: 0.8,
            then: vec![write("inner")],
            otherwise: vec![],
        });
        let outer = Action::IfVisible(Conditional {
            target: "a".to_string(),
            confidence: 0.8,
            then: vec![inner],
            otherwise: vec![],
        });
        let report = interp.run_batch(&[outer]);
        assert_eq!(report.results.len(), 3);
        assert_eq!(*log.borrow(), vec!["text:inner".to_string()]);
    }

    #[test]
    fn unavailable_matcher_policy() {
        let dir = tempdir().unwrap();
        let build = |policy| {
            let (desktop, log) = RecordingDesktop::new();
            let interp = Interpreter::new(
                Box::new(UnavailableLocator),
                Rc::new(GreyScreen),
                Box::new(desktop),
                Box::new(Silent),
                dir.path(),
            )
            .with_policy(policy);
            (interp, log)
        };
        let action = Action::IfVisible(Conditional {
            target: "x".to_string(),
            confidence: 0.8,
            then: vec![],
            otherwise: vec![write("fallback")],
        });

        let (mut lenient, log) = build(VisionPolicy::Lenient);
        let report = lenient.run_batch(std::slice::from_ref(&action));
        assert!(!report.halted);
        assert_eq!(report.results[0].details["visible"], false);
        assert_eq!(report.results[0].details["method"], "screen_unavailable");
        assert_eq!(*log.borrow(), vec!["text:fallback".to_string()]);

        let (mut strict, log) = build(VisionPolicy::Strict);
        let report = strict.run_batch(&[action]);
        assert!(report.halted);
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].success);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn newlines_type_as_shift_enter() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&write("a\nb"));
        assert!(result.success);
        assert_eq!(
            *log.borrow(),
            vec![
                "text:a",
                "key:shift:down",
                "key:enter:click",
                "key:shift:up",
                "text:b"
            ]
        );
    }

    #[test]
    fn diacritics_are_stripped_before_typing() {
        assert_eq!(strip_diacritics("canción über"), "cancion uber");
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        interp.execute(&write("añejo"));
        assert_eq!(*log.borrow(), vec!["text:anejo".to_string()]);
    }

    #[test]
    fn interval_types_per_character() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        interp.execute(&Action::Write {
            text: "ok".to_string(),
            interval: 0.01,
        });
        assert_eq!(*log.borrow(), vec!["text:o", "text:k"]);
    }

    #[test]
    fn hotkey_releases_in_reverse() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Hotkey {
            keys: vec!["ctrl".into(), "shift".into(), "t".into()],
        });
        assert!(result.success);
        assert_eq!(
            *log.borrow(),
            vec![
                "key:ctrl:down",
                "key:shift:down",
                "key:t:down",
                "key:t:up",
                "key:shift:up",
                "key:ctrl:up"
            ]
        );
    }

    #[test]
    fn hotkey_failure_releases_held_keys() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Hotkey {
            keys: vec!["ctrl".into(), "bogus".into()],
        });
        assert!(!result.success);
        assert_eq!(*log.borrow(), vec!["key:ctrl:down", "key:ctrl:up"]);
    }

    #[test]
    fn scroll_at_coordinates_takes_the_short_approach() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Scroll {
            amount: -3,
            x: Some(300),
            y: Some(200),
        });
        assert!(result.success);
        let log = log.borrow();
        assert_eq!(log.last().map(String::as_str), Some("scroll:-3"));
        assert_eq!(log[log.len() - 2], "move:300,200");
        // a 0.3 s leg plans at most 22 points plus overshoot and landing
        let moves = log.iter().filter(|e| e.starts_with("move:")).count();
        assert!(moves <= 24, "{moves} moves");
    }

    #[test]
    fn oversized_move_duration_fails_the_step() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let report = interp.run_batch(&[Action::Move {
            x: 500,
            y: 500,
            duration: 1e18,
        }]);
        assert!(report.halted);
        assert!(report.results[0].error.as_deref().unwrap().contains("duration"));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn drag_presses_moves_and_releases() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Drag {
            x1: 100,
            y1: 100,
            x2: 400,
            y2: 250,
            duration: 0.2,
        });
        assert!(result.success);
        let log = log.borrow();
        let down = log.iter().position(|e| e == "button:left:down").unwrap();
        let up = log.iter().position(|e| e == "button:left:up").unwrap();
        assert_eq!(log[down - 1], "move:100,100");
        assert_eq!(log[up - 1], "move:400,250");
        assert_eq!(up, log.len() - 1);
    }

    #[test]
    fn half_given_coordinates_are_rejected() {
        let dir = tempdir().unwrap();
        let (mut interp, log) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Click {
            x: Some(3),
            y: None,
            button: MouseButton::Left,
        });
        assert!(!result.success);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn negative_wait_is_a_failed_step() {
        let dir = tempdir().unwrap();
        let (mut interp, _) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Wait { seconds: -1.0 });
        assert!(!result.success);
        assert!(result.error.unwrap().contains("seconds"));
    }

    #[test]
    fn screenshot_writes_png_and_base64() {
        let dir = tempdir().unwrap();
        let (mut interp, _) = interpreter_with(&[], dir.path());
        let result = interp.execute(&Action::Screenshot {
            filename: Some("after".to_string()),
        });
        assert!(result.success, "{:?}", result.error);
        let path = dir.path().join("after.png");
        assert_eq!(result.details["filepath"], path.display().to_string());
        let on_disk = fs::read(&path).unwrap();
        let encoded = result.details["image_base64"].as_str().unwrap();
        assert_eq!(BASE64_STANDARD.decode(encoded).unwrap(), on_disk);
        assert_eq!(image::open(&path).unwrap().width(), 8);
    }

    #[test]
    fn step_result_serializes_flat() {
        let dir = tempdir().unwrap();
        let (mut interp, _) = interpreter_with(&[], dir.path());
        let report = interp.run_batch(&[Action::Press {
            key: "enter".to_string(),
        }]);
        let value = serde_json::to_value(&report.results[0]).unwrap();
        assert_eq!(
            value,
            json!({"action": "press", "success": true, "step": 1, "key": "enter"})
        );
    }
}
