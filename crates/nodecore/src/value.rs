use serde::{Deserialize, Serialize};

/// Literal value of a class-level attribute in a plugin source file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value")]
pub enum AttrValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Bare identifier that could not be evaluated statically
    Name(String),
    List(Vec<AttrValue>),
    /// Dict with key order preserved as written
    Dict(Vec<(String, AttrValue)>),
    Call {
        callee: String,
        args: Vec<AttrValue>,
        kwargs: Vec<(String, AttrValue)>,
    },
}

impl AttrValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(String, AttrValue)]> {
        match self {
            AttrValue::Dict(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key of a dict value
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Look up a keyword argument of a call value
    pub fn kwarg(&self, name: &str) -> Option<&AttrValue> {
        match self {
            AttrValue::Call { kwargs, .. } => kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Name of the called type, e.g. `ParameterSchema`
    pub fn callee(&self) -> Option<&str> {
        match self {
            AttrValue::Call { callee, .. } => Some(callee.rsplit('.').next().unwrap_or(callee)),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, AttrValue::None)
    }

    /// Convert into plain JSON. Calls become an object of their keyword
    /// arguments, or their single positional argument when they have none.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            AttrValue::None => Json::Null,
            AttrValue::Bool(b) => Json::Bool(*b),
            AttrValue::Int(i) => Json::from(*i),
            AttrValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            AttrValue::Str(s) | AttrValue::Name(s) => Json::String(s.clone()),
            AttrValue::List(items) => Json::Array(items.iter().map(AttrValue::to_json).collect()),
            AttrValue::Dict(items) => Json::Object(
                items
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            AttrValue::Call { args, kwargs, .. } => {
                if kwargs.is_empty() && args.len() == 1 {
                    args[0].to_json()
                } else {
                    Json::Object(
                        kwargs
                            .iter()
                            .map(|(k, v)| (k.clone(), v.to_json()))
                            .collect(),
                    )
                }
            }
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}
