//! Typed view of a workflow's declared inputs.
//!
//! The raw description is a free-form JSON mapping. It is parsed once into a
//! [`ParamTree`] so the materializer never has to look at class tags again:
//!
//! ```text
//! {
//!   "threads": 4,                                   -> Scalar([4])
//!   "reads": {                                      -> File
//!     "c-l-a-s-s": "File",
//!     "url": ["https://x/r1.fq", "https://x/r2.fq"],
//!     "security-context": "ega"
//!   },
//!   "reference": { "fasta": { "c-l-a-s-s": "File", "url": "..." } }   -> Nested
//! }
//! ```

use serde_json::{Map, Value};

use crate::error::ParamError;

pub const CLASS_KEY: &str = "c-l-a-s-s";
pub const FILE_CLASS: &str = "File";
pub const URL_KEY: &str = "url";
pub const SECURITY_CONTEXT_KEY: &str = "security-context";

/// A remote file reference (one or more URLs sharing a security context).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub urls: Vec<String>,
    pub security_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamNode {
    /// A scalar or a list, always held as a list.
    Scalar(Vec<Value>),
    File(FileRef),
    /// A nesting level; entries keep their declaration order.
    Nested(Vec<(String, ParamNode)>),
}

/// The root of a parsed parameter tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamTree {
    pub entries: Vec<(String, ParamNode)>,
}

impl ParamTree {
    /// Parse a JSON parameter mapping. `null` is accepted as "no parameters".
    pub fn from_json(value: &Value) -> Result<Self, ParamError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) => Ok(Self {
                entries: parse_mapping(map, "")?,
            }),
            other => Err(ParamError::RootNotMapping(type_name(other).into())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every file reference in the tree with its dotted key, in walk order.
    pub fn files(&self) -> Vec<(String, &FileRef)> {
        let mut out = Vec::new();
        collect_files(&self.entries, "", &mut out);
        out
    }
}

fn parse_mapping(map: &Map<String, Value>, prefix: &str) -> Result<Vec<(String, ParamNode)>, ParamError> {
    map.iter()
        .map(|(key, value)| {
            let dotted = format!("{prefix}{key}");
            parse_node(value, &dotted).map(|node| (key.clone(), node))
        })
        .collect()
}

fn parse_node(value: &Value, key: &str) -> Result<ParamNode, ParamError> {
    let Value::Object(map) = value else {
        return Ok(match value {
            Value::Array(items) => ParamNode::Scalar(items.clone()),
            scalar => ParamNode::Scalar(vec![scalar.clone()]),
        });
    };

    match map.get(CLASS_KEY) {
        None | Some(Value::Null) => Ok(ParamNode::Nested(parse_mapping(map, &format!("{key}."))?)),
        Some(Value::String(class)) if class == FILE_CLASS => parse_file(map, key).map(ParamNode::File),
        Some(other) => Err(ParamError::UnrecognizedInputClass {
            key: key.into(),
            class: match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            },
        }),
    }
}

fn parse_file(map: &Map<String, Value>, key: &str) -> Result<FileRef, ParamError> {
    let missing = || ParamError::MissingUrl { key: key.into() };

    let urls = match map.get(URL_KEY) {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_owned).ok_or_else(missing))
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(missing()),
    };

    let security_context = match map.get(SECURITY_CONTEXT_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(_) => return Err(ParamError::InvalidSecurityContext { key: key.into() }),
    };

    Ok(FileRef {
        urls,
        security_context,
    })
}

fn collect_files<'a>(entries: &'a [(String, ParamNode)], prefix: &str, out: &mut Vec<(String, &'a FileRef)>) {
    for (key, node) in entries {
        let dotted = format!("{prefix}{key}");
        match node {
            ParamNode::File(file) => out.push((dotted, file)),
            ParamNode::Nested(children) => collect_files(children, &format!("{dotted}."), out),
            ParamNode::Scalar(_) => {}
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_scalars_files_and_nesting() {
        let tree = ParamTree::from_json(&json!({
            "threads": 4,
            "modes": ["fast", "sensitive"],
            "reads": {"c-l-a-s-s": "File", "url": "https://x/r1.fq"},
            "reference": {
                "fasta": {"c-l-a-s-s": "File", "url": ["https://x/a.fa", "https://x/b.fa"], "security-context": "ega"}
            }
        }))
        .unwrap();

        let keys: Vec<&str> = tree.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["threads", "modes", "reads", "reference"]);
        assert_eq!(tree.entries[0].1, ParamNode::Scalar(vec![json!(4)]));
        assert_eq!(
            tree.entries[1].1,
            ParamNode::Scalar(vec![json!("fast"), json!("sensitive")])
        );

        let files = tree.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].0, "reads");
        assert_eq!(files[1].0, "reference.fasta");
        assert_eq!(files[1].1.urls.len(), 2);
        assert_eq!(files[1].1.security_context.as_deref(), Some("ega"));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let err = ParamTree::from_json(&json!({
            "outer": {"inner": {"c-l-a-s-s": "Unknown", "url": "https://x/a"}}
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ParamError::UnrecognizedInputClass {
                key: "outer.inner".into(),
                class: "Unknown".into()
            }
        );
    }

    #[test]
    fn file_without_url_is_rejected() {
        let err = ParamTree::from_json(&json!({"f": {"c-l-a-s-s": "File"}})).unwrap_err();
        assert_eq!(err, ParamError::MissingUrl { key: "f".into() });

        let err = ParamTree::from_json(&json!({"f": {"c-l-a-s-s": "File", "url": [1, 2]}})).unwrap_err();
        assert_eq!(err, ParamError::MissingUrl { key: "f".into() });
    }

    #[test]
    fn null_root_is_empty_and_scalar_root_is_rejected() {
        assert!(ParamTree::from_json(&Value::Null).unwrap().is_empty());
        assert!(matches!(
            ParamTree::from_json(&json!([1, 2])),
            Err(ParamError::RootNotMapping(_))
        ));
    }
}
