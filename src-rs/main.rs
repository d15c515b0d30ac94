mod action;
mod annotate;
mod desktop;
mod feedback;
mod interpreter;
mod matcher;
mod motion;
mod paths;
mod region_capture;
mod registry;
mod screen;
mod sequence;
mod template;
mod util;

use action::{Action, Conditional, DEFAULT_CONFIDENCE};
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use desktop::{probe_desktop, MouseButton};
use feedback::SoundFeedback;
use interpreter::{BatchReport, Interpreter, VisionPolicy};
use matcher::{build_locator, ImageMatcher, MatchOutcome, Point};
use paths::DataPaths;
use region_capture::{run_session, save_capture, CaptureInfo, RegionSize};
use registry::ElementRegistry;
use screen::{probe_screen, ScreenSource, StillFrame};
use sequence::SequenceStore;
use serde_json::{json, Map, Value};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::rc::Rc;
use template::MatcherConfig;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use util::{abs_path, round_to};

const COMMANDS: &[(&str, &str)] = &[
    ("commands", "Print supported commands in JSON"),
    ("find", "Locate an element on screen by template matching"),
    ("search", "Text search over element names, descriptions and tags"),
    ("stats", "Element, sequence and capture counts with data paths"),
    ("move", "Move the pointer to coordinates along a human-like path"),
    ("move-to", "Move the pointer onto a matched element"),
    ("click", "Click at coordinates or at the current position"),
    ("click-on", "Locate an element and click its center"),
    ("double-click", "Double click at coordinates or at the current position"),
    ("right-click", "Right click at coordinates or at the current position"),
    ("drag", "Press at one point and release at another"),
    ("scroll", "Scroll the wheel; positive amounts scroll up"),
    ("write", "Type text, newlines as shift+enter"),
    ("press", "Press one key"),
    ("hotkey", "Press a key combination"),
    ("mouse-pos", "Print the pointer position"),
    ("wait", "Sleep for a number of seconds"),
    ("screenshot", "Save the screen under captures/ and return it as base64"),
    ("region-capture", "Capture a screen region as a reference image"),
    ("run", "Run actions from JSON ({\"actions\": [...]} or one action)"),
    ("seq-create", "Create an empty sequence"),
    ("seq-add", "Append an action to a sequence"),
    ("seq-show", "Print a stored sequence"),
    ("seq-run", "Replay a stored sequence"),
    ("seq-list", "List sequences with action previews"),
    ("seq-delete", "Delete a sequence"),
    ("seq-describe", "Update a sequence's display name or description"),
    ("elem-add", "Add or replace an element"),
    ("elem-add-image", "Attach a reference image to an element"),
    ("elem-show", "Print one element"),
    ("elem-list", "List all elements"),
    ("elem-delete", "Delete an element"),
    ("sounds-on", "Enable audio feedback"),
    ("sounds-off", "Disable audio feedback"),
    ("sounds-status", "Print audio feedback settings"),
    ("sounds-volume", "Set audio feedback volume (0..1)"),
];

#[derive(Parser, Debug)]
#[command(
    name = "macro-agent",
    version,
    about = "Desktop macro agent: find UI elements by image, move like a human, replay action sequences"
)]
struct Cli {
    /// Data directory (defaults to $MACRO_AGENT_DATA_DIR or .macro-agent)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Treat an unavailable screen matcher as a failed conditional
    #[arg(long, global = true)]
    strict_vision: bool,
    /// Log more to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::enum_variant_names)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Locate an element on screen
    Find(FindArgs),
    /// Search elements by text
    Search { query: String },
    /// Counts and data paths
    Stats,
    /// Move the pointer to coordinates
    Move {
        #[arg(allow_negative_numbers = true)]
        x: i32,
        #[arg(allow_negative_numbers = true)]
        y: i32,
        #[arg(long, default_value_t = action::DEFAULT_MOVE_SECS)]
        duration: f64,
    },
    /// Move the pointer onto an element
    #[command(name = "move-to")]
    MoveTo {
        target: String,
        #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
        confidence: f64,
        #[arg(long, default_value_t = action::DEFAULT_MOVE_SECS)]
        duration: f64,
    },
    /// Click at coordinates or in place
    Click {
        #[command(flatten)]
        at: OptionalPoint,
        #[arg(long, value_enum, default_value_t = MouseButton::Left)]
        button: MouseButton,
    },
    /// Locate an element and click it
    #[command(name = "click-on")]
    ClickOn {
        target: String,
        #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
        confidence: f64,
        #[arg(long, value_enum, default_value_t = MouseButton::Left)]
        button: MouseButton,
    },
    /// Double click at coordinates or in place
    #[command(name = "double-click")]
    DoubleClick {
        #[command(flatten)]
        at: OptionalPoint,
    },
    /// Right click at coordinates or in place
    #[command(name = "right-click")]
    RightClick {
        #[command(flatten)]
        at: OptionalPoint,
    },
    /// Drag from (x1, y1) to (x2, y2)
    Drag {
        #[arg(allow_negative_numbers = true)]
        x1: i32,
        #[arg(allow_negative_numbers = true)]
        y1: i32,
        #[arg(allow_negative_numbers = true)]
        x2: i32,
        #[arg(allow_negative_numbers = true)]
        y2: i32,
        #[arg(long, default_value_t = action::DEFAULT_MOVE_SECS)]
        duration: f64,
    },
    /// Scroll; positive is up
    Scroll {
        #[arg(allow_negative_numbers = true)]
        amount: i32,
        #[arg(long, allow_negative_numbers = true)]
        x: Option<i32>,
        #[arg(long, allow_negative_numbers = true)]
        y: Option<i32>,
    },
    /// Type text
    Write {
        text: String,
        /// Seconds between characters
        #[arg(long, default_value_t = 0.0)]
        interval: f64,
    },
    /// Press one key
    Press { key: String },
    /// Press a key combination, e.g. `hotkey ctrl shift t`
    Hotkey {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print the pointer position
    #[command(name = "mouse-pos")]
    MousePos,
    /// Sleep
    Wait {
        #[arg(default_value_t = action::DEFAULT_WAIT_SECS)]
        seconds: f64,
    },
    /// Save a full-screen screenshot
    Screenshot {
        #[arg(long)]
        filename: Option<String>,
    },
    /// Capture a screen region as a reference image
    #[command(name = "region-capture")]
    RegionCapture(RegionCaptureArgs),
    /// Run actions from JSON: inline, a file path, or `-` for stdin
    Run { input: String },
    /// Create an empty sequence
    #[command(name = "seq-create")]
    SeqCreate {
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Append an action (compact form or JSON) to a sequence
    #[command(name = "seq-add")]
    SeqAdd(SeqAddArgs),
    /// Print a sequence
    #[command(name = "seq-show")]
    SeqShow { name: String },
    /// Replay a sequence
    #[command(name = "seq-run")]
    SeqRun { name: String },
    /// List sequences
    #[command(name = "seq-list")]
    SeqList,
    /// Delete a sequence
    #[command(name = "seq-delete")]
    SeqDelete { name: String },
    /// Update display name and/or description
    #[command(name = "seq-describe")]
    SeqDescribe {
        name: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Add or replace an element
    #[command(name = "elem-add")]
    ElemAdd {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Comma separated image filenames under captures/
        #[arg(long, value_delimiter = ',')]
        images: Vec<String>,
        /// Comma separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Attach an image to an element
    #[command(name = "elem-add-image")]
    ElemAddImage { name: String, image: String },
    /// Print one element
    #[command(name = "elem-show")]
    ElemShow { name: String },
    /// List elements
    #[command(name = "elem-list")]
    ElemList,
    /// Delete an element
    #[command(name = "elem-delete")]
    ElemDelete { name: String },
    /// Enable audio feedback
    #[command(name = "sounds-on")]
    SoundsOn,
    /// Disable audio feedback
    #[command(name = "sounds-off")]
    SoundsOff,
    /// Print audio feedback settings
    #[command(name = "sounds-status")]
    SoundsStatus,
    /// Set audio feedback volume
    #[command(name = "sounds-volume")]
    SoundsVolume { volume: f64 },
}

#[derive(Args, Debug)]
struct OptionalPoint {
    #[arg(allow_negative_numbers = true, requires = "y")]
    x: Option<i32>,
    #[arg(allow_negative_numbers = true)]
    y: Option<i32>,
}

#[derive(Args, Debug)]
struct FindArgs {
    name: String,
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    confidence: f64,
    /// Match against a saved screenshot instead of the live screen
    #[arg(long)]
    screen_file: Option<PathBuf>,
    /// Write the frame with candidate boxes to this PNG
    #[arg(long)]
    annotate_out: Option<PathBuf>,
    /// Candidates drawn with --annotate-out
    #[arg(long, default_value_t = 5)]
    annotate_top: usize,
    /// Coarse pyramid factor (2 or 4 speeds up large templates); 1 searches
    /// every position at full resolution
    #[arg(long, default_value_t = 1)]
    max_downscale: u32,
}

#[derive(Args, Debug)]
struct RegionCaptureArgs {
    /// Element name; without it an interactive session starts
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
    /// Region center as X,Y (defaults to the pointer position)
    #[arg(long)]
    at: Option<String>,
    /// Region size as WxH
    #[arg(long, default_value = "200x200")]
    size: String,
}

#[derive(Args, Debug)]
struct SeqAddArgs {
    name: String,
    /// e.g. "click-on save_button", "wait 1.5", or a JSON action object
    action: String,
    /// Branch action for if-visible/if-not-visible (repeatable)
    #[arg(long = "then")]
    then_actions: Vec<String>,
    /// Else-branch action (repeatable)
    #[arg(long = "else")]
    else_actions: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (payload, failed) = match run(cli) {
        Ok(payload) => {
            let failed = payload.get("success") == Some(&Value::Bool(false));
            (payload, failed)
        }
        Err(err) => (json!({ "success": false, "error": format!("{err:#}") }), true),
    };
    let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    println!("{text}");
    if failed {
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("MACRO_AGENT_LOG").unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

/// Resolved data layout plus the startup-time vision policy.
struct App {
    paths: DataPaths,
    registry: ElementRegistry,
    policy: VisionPolicy,
}

impl App {
    fn open(data_dir: Option<PathBuf>, strict_vision: bool) -> Result<Self> {
        let paths = DataPaths::resolve(data_dir.as_deref());
        paths.ensure_layout()?;
        debug!(root = %paths.root.display(), "data directory ready");
        Ok(Self {
            registry: ElementRegistry::new(&paths.elements_file),
            policy: if strict_vision {
                VisionPolicy::Strict
            } else {
                VisionPolicy::Lenient
            },
            paths,
        })
    }

    fn sounds(&self) -> SoundFeedback {
        SoundFeedback::open(&self.paths.sounds_state_file, &self.paths.sounds_dir)
    }

    fn sequences(&self) -> SequenceStore {
        SequenceStore::new(&self.paths.sequences_dir)
    }

    fn interpreter(&self) -> Interpreter {
        let screen: Rc<dyn ScreenSource> = Rc::from(probe_screen());
        let locator = build_locator(
            self.registry.clone(),
            &self.paths.captures_dir,
            Rc::clone(&screen),
            MatcherConfig::default(),
        );
        Interpreter::new(
            locator,
            screen,
            probe_desktop(),
            Box::new(self.sounds()),
            &self.paths.captures_dir,
        )
        .with_policy(self.policy)
    }

    fn execute(&self, action: Action) -> Result<Value> {
        let result = self.interpreter().execute(&action);
        Ok(serde_json::to_value(result)?)
    }
}

fn run(cli: Cli) -> Result<Value> {
    if let Commands::Commands = cli.command {
        return Ok(command_list());
    }
    let app = App::open(cli.data_dir, cli.strict_vision)?;

    match cli.command {
        Commands::Commands => Ok(command_list()),
        Commands::Find(args) => command_find(&app, args),
        Commands::Search { query } => command_search(&app, &query),
        Commands::Stats => command_stats(&app),
        Commands::Move { x, y, duration } => app.execute(Action::Move { x, y, duration }),
        Commands::MoveTo {
            target,
            confidence,
            duration,
        } => app.execute(Action::MoveTo {
            target,
            confidence,
            duration,
        }),
        Commands::Click { at, button } => app.execute(Action::Click {
            x: at.x,
            y: at.y,
            button,
        }),
        Commands::ClickOn {
            target,
            confidence,
            button,
        } => app.execute(Action::ClickOn {
            target,
            confidence,
            button,
        }),
        Commands::DoubleClick { at } => app.execute(Action::DoubleClick { x: at.x, y: at.y }),
        Commands::RightClick { at } => app.execute(Action::RightClick { x: at.x, y: at.y }),
        Commands::Drag {
            x1,
            y1,
            x2,
            y2,
            duration,
        } => app.execute(Action::Drag {
            x1,
            y1,
            x2,
            y2,
            duration,
        }),
        Commands::Scroll { amount, x, y } => app.execute(Action::Scroll { amount, x, y }),
        Commands::Write { text, interval } => app.execute(Action::Write { text, interval }),
        Commands::Press { key } => app.execute(Action::Press { key }),
        Commands::Hotkey { keys } => app.execute(Action::Hotkey { keys }),
        Commands::MousePos => command_mouse_pos(),
        Commands::Wait { seconds } => app.execute(Action::Wait { seconds }),
        Commands::Screenshot { filename } => app.execute(Action::Screenshot { filename }),
        Commands::RegionCapture(args) => command_region_capture(&app, args),
        Commands::Run { input } => command_run(&app, &input),
        Commands::SeqCreate {
            name,
            display_name,
            description,
        } => {
            let seq = app
                .sequences()
                .create(&name, display_name.as_deref(), &description)?;
            Ok(json!({
                "success": true,
                "action": "seq-create",
                "name": seq.name,
                "display_name": seq.display_name,
                "description": seq.description,
            }))
        }
        Commands::SeqAdd(args) => command_seq_add(&app, args),
        Commands::SeqShow { name } => {
            let seq = app.sequences().require(&name)?;
            Ok(json!({ "success": true, "action": "seq-show", "sequence": seq }))
        }
        Commands::SeqRun { name } => {
            let mut interpreter = app.interpreter();
            let (_, report) = app.sequences().run(&name, &mut interpreter)?;
            batch_output("seq-run", Some(&name), report)
        }
        Commands::SeqList => {
            let sequences = app.sequences().list()?;
            Ok(json!({
                "success": true,
                "action": "seq-list",
                "count": sequences.len(),
                "sequences": sequences,
            }))
        }
        Commands::SeqDelete { name } => {
            if !app.sequences().delete(&name)? {
                bail!("sequence not found: {name}");
            }
            Ok(json!({ "success": true, "action": "seq-delete", "name": name }))
        }
        Commands::SeqDescribe {
            name,
            display_name,
            description,
        } => {
            let (seq, updated) =
                app.sequences()
                    .describe(&name, display_name.as_deref(), description.as_deref())?;
            Ok(json!({
                "success": true,
                "action": "seq-describe",
                "name": seq.name,
                "display_name": seq.display_name(),
                "description": seq.description,
                "updated": updated,
            }))
        }
        Commands::ElemAdd {
            name,
            description,
            images,
            tags,
        } => {
            let images = trimmed(images);
            for image in &images {
                if !app.paths.captures_dir.join(image).exists() {
                    warn!(image = %image, "image not found under captures/");
                }
            }
            let element = app
                .registry
                .add_or_update(&name, &description, &images, &trimmed(tags))?;
            Ok(json!({ "success": true, "action": "elem-add", "element": element }))
        }
        Commands::ElemAddImage { name, image } => {
            if !app.paths.captures_dir.join(&image).exists() {
                warn!(image = %image, "image not found under captures/");
            }
            let element = app.registry.add_image(&name, &image)?;
            Ok(json!({ "success": true, "action": "elem-add-image", "element": element }))
        }
        Commands::ElemShow { name } => match app.registry.get(&name)? {
            Some(element) => Ok(json!({ "success": true, "action": "elem-show", "element": element })),
            None => bail!("element not found: {name}"),
        },
        Commands::ElemList => {
            let elements = app.registry.load()?;
            let rows: Vec<Value> = elements
                .values()
                .map(|e| {
                    json!({
                        "name": e.name,
                        "description": e.description,
                        "images": e.images.len(),
                        "tags": e.tags,
                    })
                })
                .collect();
            Ok(json!({
                "success": true,
                "action": "elem-list",
                "count": rows.len(),
                "elements": rows,
            }))
        }
        Commands::ElemDelete { name } => {
            if !app.registry.delete(&name)? {
                bail!("element not found: {name}");
            }
            Ok(json!({ "success": true, "action": "elem-delete", "name": name }))
        }
        Commands::SoundsOn => {
            app.sounds().set_enabled(true)?;
            sounds_output(&app, "sounds-on")
        }
        Commands::SoundsOff => {
            app.sounds().set_enabled(false)?;
            sounds_output(&app, "sounds-off")
        }
        Commands::SoundsStatus => sounds_output(&app, "sounds-status"),
        Commands::SoundsVolume { volume } => {
            if !(0.0..=1.0).contains(&volume) {
                bail!("volume must be between 0 and 1, got {volume}");
            }
            app.sounds().set_volume(volume)?;
            sounds_output(&app, "sounds-volume")
        }
    }
}

fn command_list() -> Value {
    let rows: Vec<Value> = COMMANDS
        .iter()
        .map(|(name, description)| json!({ "name": name, "description": description }))
        .collect();
    json!({ "success": true, "commands": rows })
}

fn command_find(app: &App, args: FindArgs) -> Result<Value> {
    let screen: Rc<dyn ScreenSource> = match &args.screen_file {
        Some(path) => Rc::new(StillFrame::new(path)),
        None => Rc::from(probe_screen()),
    };
    let config = MatcherConfig {
        max_downscale: args.max_downscale.max(1),
        ..MatcherConfig::default()
    };

    let mut annotated = None;
    let outcome = match &args.annotate_out {
        Some(out) if screen.is_available() => {
            let matcher =
                ImageMatcher::new(app.registry.clone(), &app.paths.captures_dir, screen, config);
            let (outcome, frame) = matcher.find_with_frame(&args.name, args.confidence);
            if let Some(frame) = frame {
                annotate::save_annotated(out, &frame, &outcome.info, args.annotate_top)?;
                annotated = Some(abs_path(out).display().to_string());
            }
            outcome
        }
        _ => build_locator(app.registry.clone(), &app.paths.captures_dir, screen, config)
            .find(&args.name, args.confidence),
    };

    let mut payload = find_payload(&args.name, &outcome);
    if let Some(path) = annotated {
        payload.insert("annotated".into(), json!(path));
    }
    Ok(Value::Object(payload))
}

fn find_payload(name: &str, outcome: &MatchOutcome) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("success".into(), json!(outcome.is_visible()));
    payload.insert("action".into(), json!("find"));
    payload.insert("target".into(), json!(name));
    payload.insert(
        "coordinates".into(),
        match outcome.location {
            Some(Point { x, y }) => json!({ "x": x, "y": y }),
            None => Value::Null,
        },
    );
    payload.insert("method".into(), json!(outcome.method.as_str()));
    payload.insert("best_score".into(), json!(round_to(outcome.info.best_score, 4)));
    payload.insert("match_info".into(), json!(outcome.info));
    if !outcome.is_visible() {
        payload.insert("error".into(), json!(format!("element not found on screen: {name}")));
    }
    payload
}

fn command_search(app: &App, query: &str) -> Result<Value> {
    let hits = app.registry.search(query)?;
    let top: Vec<_> = hits.iter().take(10).collect();
    Ok(json!({
        "success": true,
        "action": "search",
        "query": query,
        "count": hits.len(),
        "results": top,
    }))
}

fn command_stats(app: &App) -> Result<Value> {
    let elements = app.registry.load()?;
    let images: usize = elements.values().map(|e| e.images.len()).sum();
    let captures = fs::read_dir(&app.paths.captures_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "png"))
                .count()
        })
        .unwrap_or(0);
    let sequences = app.sequences().list()?.len();
    Ok(json!({
        "success": true,
        "action": "stats",
        "elements": elements.len(),
        "images": images,
        "captures": captures,
        "sequences": sequences,
        "data_dir": abs_path(&app.paths.root).display().to_string(),
        "elements_file": abs_path(app.registry.path()).display().to_string(),
        "captures_dir": abs_path(&app.paths.captures_dir).display().to_string(),
        "sequences_dir": abs_path(&app.paths.sequences_dir).display().to_string(),
    }))
}

fn command_mouse_pos() -> Result<Value> {
    let point = probe_desktop().position()?;
    Ok(json!({ "success": true, "action": "mouse-pos", "x": point.x, "y": point.y }))
}

fn command_region_capture(app: &App, args: RegionCaptureArgs) -> Result<Value> {
    let size = RegionSize::parse(&args.size)?;
    let screen = probe_screen();
    let mut desktop = probe_desktop();

    let Some(name) = args.name else {
        let report = run_session(
            &app.registry,
            &app.paths.captures_dir,
            screen.as_ref(),
            desktop.as_mut(),
            size,
        )?;
        return Ok(json!({
            "success": true,
            "action": "region-capture",
            "count": report.captures.len(),
            "captures": report.captures,
            "final_size": report.final_size,
        }));
    };

    let center = match args.at.as_deref() {
        Some(raw) => parse_point(raw)?,
        None => desktop
            .position()
            .context("no --at given and the pointer position is unavailable")?,
    };
    let frame = screen.capture()?;
    let info = CaptureInfo {
        name,
        description: args.description,
        tags: trimmed(args.tags),
    };
    let saved = save_capture(&app.registry, &app.paths.captures_dir, &frame, center, size, &info)?;
    let mut payload = json!({ "success": true, "action": "region-capture" });
    if let (Value::Object(out), Ok(Value::Object(fields))) = (&mut payload, serde_json::to_value(&saved)) {
        out.extend(fields);
    }
    Ok(payload)
}

fn command_run(app: &App, input: &str) -> Result<Value> {
    let raw = if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read actions from stdin")?;
        buf
    } else if input.trim_start().starts_with(['{', '[']) {
        input.to_string()
    } else {
        fs::read_to_string(input).with_context(|| format!("failed to read actions file: {input}"))?
    };
    let value: Value = serde_json::from_str(&raw).context("invalid actions JSON")?;
    let actions = Action::list_from_value(value)?;
    if actions.is_empty() {
        bail!("no actions to run");
    }
    let report = app.interpreter().run_batch(&actions);
    batch_output("run", None, report)
}

fn command_seq_add(app: &App, args: SeqAddArgs) -> Result<Value> {
    let mut action = parse_action_arg(&args.action)?;
    let branches = |items: &[String]| -> Result<Vec<Action>> {
        items.iter().map(|item| parse_action_arg(item)).collect()
    };
    let has_branches = !args.then_actions.is_empty() || !args.else_actions.is_empty();
    if has_branches && !action.is_conditional() {
        bail!("--then/--else only apply to if-visible and if-not-visible");
    }
    if let Action::IfVisible(cond) | Action::IfNotVisible(cond) = &mut action {
        let Conditional { then, otherwise, .. } = cond;
        then.extend(branches(&args.then_actions)?);
        otherwise.extend(branches(&args.else_actions)?);
    }
    let seq = app.sequences().add_action(&args.name, action.clone())?;
    Ok(json!({
        "success": true,
        "action": "seq-add",
        "sequence": seq.name,
        "added": action,
        "total_actions": seq.actions.len(),
    }))
}

fn parse_action_arg(raw: &str) -> Result<Action> {
    if raw.trim_start().starts_with('{') {
        let value: Value = serde_json::from_str(raw).context("invalid action JSON")?;
        return Ok(Action::from_value(value)?);
    }
    Ok(Action::parse_compact(raw)?)
}

fn batch_output(action: &str, sequence: Option<&str>, report: BatchReport) -> Result<Value> {
    let mut payload = json!({
        "success": report.success(),
        "action": action,
        "total": report.total,
        "completed": report.completed,
        "halted": report.halted,
        "results": report.results,
    });
    if let (Some(name), Value::Object(out)) = (sequence, &mut payload) {
        out.insert("sequence".into(), json!(name));
    }
    Ok(payload)
}

fn sounds_output(app: &App, action: &str) -> Result<Value> {
    let mut payload = json!({ "success": true, "action": action });
    if let (Value::Object(out), Value::Object(status)) = (&mut payload, app.sounds().status()) {
        out.extend(status);
    }
    Ok(payload)
}

fn parse_point(raw: &str) -> Result<Point> {
    let Some((x, y)) = raw.split_once(',') else {
        bail!("point must look like X,Y, got {raw:?}");
    };
    let x = x.trim().parse().with_context(|| format!("invalid x in {raw:?}"))?;
    let y = y.trim().parse().with_context(|| format!("invalid y in {raw:?}"))?;
    Ok(Point::new(x, y))
}

fn trimmed(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}
