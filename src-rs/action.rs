use crate::desktop::MouseButton;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_CONFIDENCE: f64 = 0.8;
pub const DEFAULT_MOVE_SECS: f64 = 0.5;
pub const DEFAULT_WAIT_SECS: f64 = 1.0;

pub const ACTION_TAGS: [&str; 15] = [
    "move",
    "move-to",
    "click",
    "click-on",
    "double-click",
    "right-click",
    "drag",
    "scroll",
    "write",
    "press",
    "hotkey",
    "wait",
    "screenshot",
    "if-visible",
    "if-not-visible",
];

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn default_move_secs() -> f64 {
    DEFAULT_MOVE_SECS
}

fn default_wait_secs() -> f64 {
    DEFAULT_WAIT_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    Move {
        x: i32,
        y: i32,
        #[serde(default = "default_move_secs")]
        duration: f64,
    },
    MoveTo {
        target: String,
        #[serde(default = "default_confidence")]
        confidence: f64,
        #[serde(default = "default_move_secs")]
        duration: f64,
    },
    Click {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
        #[serde(default)]
        button: MouseButton,
    },
    ClickOn {
        target: String,
        #[serde(default = "default_confidence")]
        confidence: f64,
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },
    RightClick {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },
    Drag {
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        #[serde(default = "default_move_secs")]
        duration: f64,
    },
    Scroll {
        amount: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },
    Write {
        text: String,
        /// Seconds between characters; zero types the segment at once.
        #[serde(default)]
        interval: f64,
    },
    Press {
        key: String,
    },
    Hotkey {
        #[serde(deserialize_with = "keys_list_or_string")]
        keys: Vec<String>,
    },
    Wait {
        #[serde(default = "default_wait_secs")]
        seconds: f64,
    },
    Screenshot {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    IfVisible(Conditional),
    IfNotVisible(Conditional),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conditional {
    pub target: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub then: Vec<Action>,
    #[serde(default, rename = "else")]
    pub otherwise: Vec<Action>,
}

fn keys_list_or_string<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keys {
        List(Vec<String>),
        Spaced(String),
    }
    Ok(match Keys::deserialize(deserializer)? {
        Keys::List(keys) => keys,
        Keys::Spaced(raw) => raw.split_whitespace().map(str::to_string).collect(),
    })
}

#[derive(Debug, Error)]
pub enum ActionParseError {
    #[error("action is missing a \"type\" field")]
    MissingType,
    #[error("unknown action type: {0}")]
    UnknownType(String),
    #[error("invalid {tag} action: {message}")]
    Malformed { tag: String, message: String },
}

impl Action {
    /// Parse one action, naming the offending tag on failure.
    pub fn from_value(value: Value) -> Result<Self, ActionParseError> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ActionParseError::MissingType)?
            .to_string();
        if !ACTION_TAGS.contains(&tag.as_str()) {
            return Err(ActionParseError::UnknownType(tag));
        }
        serde_json::from_value(value).map_err(|err| ActionParseError::Malformed {
            tag,
            message: err.to_string(),
        })
    }

    /// `{"actions": [...]}` or a single action object.
    pub fn list_from_value(value: Value) -> Result<Vec<Self>, ActionParseError> {
        match value {
            Value::Object(mut obj) if obj.contains_key("actions") => {
                let actions = match obj.remove("actions") {
                    Some(Value::Array(items)) => items,
                    _ => {
                        return Err(ActionParseError::Malformed {
                            tag: "actions".to_string(),
                            message: "\"actions\" must be an array".to_string(),
                        })
                    }
                };
                actions.into_iter().map(Self::from_value).collect()
            }
            Value::Object(obj) if obj.contains_key("type") => {
                Ok(vec![Self::from_value(Value::Object(obj))?])
            }
            Value::Array(items) => items.into_iter().map(Self::from_value).collect(),
            _ => Ok(Vec::new()),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::MoveTo { .. } => "move-to",
            Self::Click { .. } => "click",
            Self::ClickOn { .. } => "click-on",
            Self::DoubleClick { .. } => "double-click",
            Self::RightClick { .. } => "right-click",
            Self::Drag { .. } => "drag",
            Self::Scroll { .. } => "scroll",
            Self::Write { .. } => "write",
            Self::Press { .. } => "press",
            Self::Hotkey { .. } => "hotkey",
            Self::Wait { .. } => "wait",
            Self::Screenshot { .. } => "screenshot",
            Self::IfVisible(_) => "if-visible",
            Self::IfNotVisible(_) => "if-not-visible",
        }
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::IfVisible(_) | Self::IfNotVisible(_))
    }

    /// Short label used when listing sequences.
    pub fn preview(&self) -> String {
        match self {
            Self::ClickOn { target, .. } => format!("click:{target}"),
            Self::MoveTo { target, .. } => format!("move-to:{target}"),
            Self::Wait { seconds } => format!("wait:{seconds}s"),
            Self::Write { text, .. } => {
                let head: String = text.chars().take(10).collect();
                format!("write:{head}...")
            }
            Self::Press { key } => format!("press:{key}"),
            Self::Hotkey { keys } => format!("hotkey:{}", keys.join("+")),
            Self::IfVisible(cond) => format!("if-visible:{}", cond.target),
            Self::IfNotVisible(cond) => format!("if-not-visible:{}", cond.target),
            other => other.tag().to_string(),
        }
    }

    /// Parse the compact one-line form, e.g. `click-on save_button`,
    /// `wait 1.5`, `drag 10 10 200 200`.
    pub fn parse_compact(input: &str) -> Result<Self, ActionParseError> {
        let input = input.trim();
        let (tag, rest) = match input.split_once(char::is_whitespace) {
            Some((tag, rest)) => (tag, rest.trim()),
            None => (input, ""),
        };
        if tag.is_empty() {
            return Err(ActionParseError::MissingType);
        }
        let malformed = |message: &str| ActionParseError::Malformed {
            tag: tag.to_string(),
            message: message.to_string(),
        };
        let ints = |count: usize| -> Result<Vec<i32>, ActionParseError> {
            let values: Vec<i32> = rest
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| malformed("expected integer arguments"))?;
            if values.len() != count {
                return Err(malformed(&format!("expected {count} integers")));
            }
            Ok(values)
        };
        let target = || {
            if rest.is_empty() {
                Err(malformed("missing target"))
            } else {
                Ok(rest.to_string())
            }
        };

        let action = match tag {
            "move" => {
                let v = ints(2)?;
                Self::Move {
                    x: v[0],
                    y: v[1],
                    duration: DEFAULT_MOVE_SECS,
                }
            }
            "move-to" => Self::MoveTo {
                target: target()?,
                confidence: DEFAULT_CONFIDENCE,
                duration: DEFAULT_MOVE_SECS,
            },
            "click" | "double-click" | "right-click" => {
                let (x, y) = if rest.is_empty() {
                    (None, None)
                } else {
                    let v = ints(2)?;
                    (Some(v[0]), Some(v[1]))
                };
                match tag {
                    "click" => Self::Click {
                        x,
                        y,
                        button: MouseButton::Left,
                    },
                    "double-click" => Self::DoubleClick { x, y },
                    _ => Self::RightClick { x, y },
                }
            }
            "click-on" => Self::ClickOn {
                target: target()?,
                confidence: DEFAULT_CONFIDENCE,
                button: MouseButton::Left,
            },
            "drag" => {
                let v = ints(4)?;
                Self::Drag {
                    x1: v[0],
                    y1: v[1],
                    x2: v[2],
                    y2: v[3],
                    duration: DEFAULT_MOVE_SECS,
                }
            }
            "scroll" => {
                let v = ints(1)?;
                Self::Scroll {
                    amount: v[0],
                    x: None,
                    y: None,
                }
            }
            "write" => Self::Write {
                text: rest.trim_matches(|c| c == '\'' || c == '"').to_string(),
                interval: 0.0,
            },
            "press" => Self::Press { key: target()? },
            "hotkey" => {
                let keys: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
                if keys.is_empty() {
                    return Err(malformed("missing keys"));
                }
                Self::Hotkey { keys }
            }
            "wait" => Self::Wait {
                seconds: if rest.is_empty() {
                    DEFAULT_WAIT_SECS
                } else {
                    rest.parse().map_err(|_| malformed("expected seconds"))?
                },
            },
            "screenshot" => Self::Screenshot {
                filename: (!rest.is_empty()).then(|| rest.to_string()),
            },
            "if-visible" | "if-not-visible" => {
                let cond = Conditional {
                    target: target()?,
                    confidence: DEFAULT_CONFIDENCE,
                    then: Vec::new(),
                    otherwise: Vec::new(),
                };
                if tag == "if-visible" {
                    Self::IfVisible(cond)
                } else {
                    Self::IfNotVisible(cond)
                }
            }
            other => return Err(ActionParseError::UnknownType(other.to_string())),
        };
        Ok(action)
    }
}
