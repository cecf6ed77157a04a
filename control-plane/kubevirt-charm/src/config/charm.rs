use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scalar charm option value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConfigValue {
    /// Convert a raw JSON value. Null, empty strings and non-scalars yield
    /// `None`, which the layering treats as "unset".
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(ConfigValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(ConfigValue::Int)
                .or_else(|| n.as_f64().map(ConfigValue::Float)),
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(ConfigValue::Str(s.clone())),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; floats are only accepted when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ConfigValue::Str(s) if s.is_empty())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::Float(x) => write!(f, "{x}"),
            ConfigValue::Str(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum OptionType {
    String,
    Boolean,
    Integer,
}

impl OptionType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            OptionType::String => value.is_string(),
            OptionType::Boolean => value.is_boolean(),
            OptionType::Integer => value.is_i64() || value.is_u64(),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            OptionType::String => "a string",
            OptionType::Boolean => "a boolean",
            OptionType::Integer => "an integer",
        }
    }
}

/// Options declared by the charm and their expected types.
const OPTIONS: &[(&str, OptionType)] = &[
    ("image-registry", OptionType::String),
    ("operator-release", OptionType::String),
    ("software-emulation", OptionType::Boolean),
    ("pvc-tolerate-less-space-up-to-percent", OptionType::Integer),
];

/// Operator-supplied charm options as returned by `config-get`.
#[derive(Clone, Debug, Default)]
pub struct CharmConfig {
    raw: BTreeMap<String, Value>,
}

impl CharmConfig {
    pub fn new(raw: BTreeMap<String, Value>) -> Self {
        Self { raw }
    }

    /// First schema violation, if any. Unset values are always valid.
    pub fn evaluate(&self) -> Option<String> {
        for (key, ty) in OPTIONS {
            match self.raw.get(*key) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s))
                    if s.is_empty() && !matches!(ty, OptionType::String) =>
                {
                    continue;
                }
                Some(v) if ty.accepts(v) => continue,
                Some(_) => {
                    return Some(format!(
                        "Invalid charm config: {key} must be {}",
                        ty.describe()
                    ));
                }
            }
        }
        None
    }

    /// Sparse view of the options: unset and empty values are dropped.
    pub fn available_data(&self) -> BTreeMap<String, ConfigValue> {
        self.raw
            .iter()
            .filter_map(|(k, v)| ConfigValue::from_json(v).map(|v| (k.clone(), v)))
            .collect()
    }
}
