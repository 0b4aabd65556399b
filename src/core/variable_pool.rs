use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use crate::domain::model::{
    Selector, CONVERSATION_VARIABLE_NODE_ID, ENVIRONMENT_VARIABLE_NODE_ID,
    SYSTEM_VARIABLE_NODE_ID,
};
use crate::error::{NodeError, NodeResult};

// ================================
// Segment – typed variable values
// ================================

/// A typed value stored in the [`VariablePool`].
///
/// Serialization is tagged so that a snapshot restores the exact variant
/// (`Integer` vs `Float`, `File` vs `Object`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "kebab-case")]
pub enum Segment {
    None,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Object(HashMap<String, Segment>),
    ArrayString(Vec<String>),
    Array(Vec<Segment>),
    File(FileSegment),
    ArrayFile(Vec<FileSegment>),
}

/// File metadata. The bytes live in external storage; `related_id` or `url`
/// points at them.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FileSegment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default, rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub transfer_method: String,
    #[serde(default)]
    pub related_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
}

impl FileSegment {
    /// Resolve one attribute of the file, as addressed by a selector path.
    pub fn attribute(&self, name: &str) -> Option<Segment> {
        let opt_str = |v: &Option<String>| v.clone().map(Segment::String).unwrap_or(Segment::None);
        let seg = match name {
            "id" => opt_str(&self.id),
            "tenant_id" => Segment::String(self.tenant_id.clone()),
            "type" => Segment::String(self.file_type.clone()),
            "transfer_method" => Segment::String(self.transfer_method.clone()),
            "related_id" => opt_str(&self.related_id),
            "url" => opt_str(&self.url),
            "name" | "filename" => opt_str(&self.filename),
            "mime_type" => opt_str(&self.mime_type),
            "extension" => opt_str(&self.extension),
            "size" => self.size.map(Segment::Integer).unwrap_or(Segment::None),
            _ => return None,
        };
        Some(seg)
    }
}

/// Declared type of a variable, as written in node configs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentType {
    Any,
    String,
    Number,
    Boolean,
    Object,
    ArrayString,
    ArrayNumber,
    ArrayObject,
    Array,
    File,
    ArrayFile,
}

impl SegmentType {
    pub fn from_dsl_type(t: &str) -> Option<Self> {
        match t {
            "any" => Some(SegmentType::Any),
            "string" => Some(SegmentType::String),
            "number" => Some(SegmentType::Number),
            "boolean" => Some(SegmentType::Boolean),
            "object" => Some(SegmentType::Object),
            "array[string]" => Some(SegmentType::ArrayString),
            "array[number]" => Some(SegmentType::ArrayNumber),
            "array[object]" => Some(SegmentType::ArrayObject),
            "array[any]" => Some(SegmentType::Array),
            "file" => Some(SegmentType::File),
            "array[file]" => Some(SegmentType::ArrayFile),
            _ => None,
        }
    }
}

impl Segment {
    pub fn matches_type(&self, t: &SegmentType) -> bool {
        match (t, self) {
            (SegmentType::Any, _) => true,
            (_, Segment::None) => true,
            (SegmentType::String, Segment::String(_)) => true,
            (SegmentType::Number, Segment::Integer(_) | Segment::Float(_)) => true,
            (SegmentType::Boolean, Segment::Boolean(_)) => true,
            (SegmentType::Object, Segment::Object(_)) => true,
            (SegmentType::File, Segment::File(_)) => true,
            (SegmentType::ArrayFile, Segment::ArrayFile(_)) => true,
            (SegmentType::ArrayString, Segment::ArrayString(_)) => true,
            (SegmentType::ArrayString, Segment::Array(items)) => items.is_empty(),
            (SegmentType::ArrayNumber, Segment::Array(items)) => items
                .iter()
                .all(|s| matches!(s, Segment::Integer(_) | Segment::Float(_))),
            (SegmentType::ArrayObject, Segment::Array(items)) => {
                items.iter().all(|s| matches!(s, Segment::Object(_)))
            }
            (SegmentType::Array, Segment::Array(_) | Segment::ArrayString(_)) => true,
            _ => false,
        }
    }

    /// Convert Segment → serde_json::Value
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => serde_json::json!(*i),
            Segment::Float(f) => serde_json::json!(*f),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
            Segment::ArrayString(v) => {
                Value::Array(v.iter().map(|s| Value::String(s.clone())).collect())
            }
            Segment::Array(v) => Value::Array(v.iter().map(|s| s.to_value()).collect()),
            Segment::File(file) => serde_json::to_value(file).unwrap_or(Value::Null),
            Segment::ArrayFile(files) => Value::Array(
                files
                    .iter()
                    .map(|f| serde_json::to_value(f).unwrap_or(Value::Null))
                    .collect(),
            ),
        }
    }

    /// Create Segment from serde_json::Value
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Segment::Integer(i),
                None => Segment::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => Segment::String(s.clone()),
            Value::Array(arr) => {
                if !arr.is_empty() && arr.iter().all(|v| v.is_string()) {
                    Segment::ArrayString(
                        arr.iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect(),
                    )
                } else {
                    Segment::Array(arr.iter().map(Segment::from_value).collect())
                }
            }
            Value::Object(map) => Segment::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Segment::from_value(v)))
                    .collect(),
            ),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Segment::None => true,
            Segment::String(s) => s.is_empty(),
            Segment::ArrayString(v) => v.is_empty(),
            Segment::Array(v) => v.is_empty(),
            Segment::ArrayFile(v) => v.is_empty(),
            Segment::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Float(f) => Some(*f),
            Segment::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Array-like segments as a list of items.
    pub fn as_items(&self) -> Option<Vec<Segment>> {
        match self {
            Segment::Array(items) => Some(items.clone()),
            Segment::ArrayString(items) => {
                Some(items.iter().cloned().map(Segment::String).collect())
            }
            Segment::ArrayFile(files) => Some(files.iter().cloned().map(Segment::File).collect()),
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            Segment::File(file) => file.filename.clone().unwrap_or_default(),
            other => serde_json::to_string(&other.to_value()).unwrap_or_default(),
        }
    }

    fn field(&self, name: &str) -> Option<Segment> {
        match self {
            Segment::Object(map) => map.get(name).cloned(),
            Segment::File(file) => file.attribute(name),
            _ => None,
        }
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Segment::None, Segment::None) => true,
            (Segment::String(a), Segment::String(b)) => a == b,
            (Segment::Integer(a), Segment::Integer(b)) => a == b,
            (Segment::Float(a), Segment::Float(b)) => (a - b).abs() < 1e-10,
            (Segment::Integer(a), Segment::Float(b)) | (Segment::Float(b), Segment::Integer(a)) => {
                (*a as f64 - b).abs() < 1e-10
            }
            (Segment::Boolean(a), Segment::Boolean(b)) => a == b,
            (Segment::ArrayString(a), Segment::ArrayString(b)) => a == b,
            (Segment::File(a), Segment::File(b)) => a == b,
            _ => self.to_value() == other.to_value(),
        }
    }
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::String(s.to_string())
    }
}

impl From<String> for Segment {
    fn from(s: String) -> Self {
        Segment::String(s)
    }
}

impl From<i64> for Segment {
    fn from(i: i64) -> Self {
        Segment::Integer(i)
    }
}

impl From<bool> for Segment {
    fn from(b: bool) -> Self {
        Segment::Boolean(b)
    }
}

impl From<Value> for Segment {
    fn from(v: Value) -> Self {
        Segment::from_value(&v)
    }
}

// ================================
// VariablePool
// ================================

/// Scoped variable store: `scope -> name -> segment`.
///
/// Scopes are `sys`, `env`, `conversation` and one scope per node id. User
/// inputs are held apart and copied into the start node's scope when it runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VariablePool {
    variables: HashMap<String, HashMap<String, Segment>>,
    #[serde(default)]
    user_inputs: HashMap<String, Segment>,
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system_variables(mut self, vars: HashMap<String, Value>) -> Self {
        self.set_scope(SYSTEM_VARIABLE_NODE_ID, vars);
        self
    }

    pub fn with_environment_variables(mut self, vars: HashMap<String, Value>) -> Self {
        self.set_scope(ENVIRONMENT_VARIABLE_NODE_ID, vars);
        self
    }

    pub fn with_conversation_variables(mut self, vars: HashMap<String, Value>) -> Self {
        self.set_scope(CONVERSATION_VARIABLE_NODE_ID, vars);
        self
    }

    pub fn with_user_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.user_inputs = inputs
            .into_iter()
            .map(|(k, v)| (k, Segment::from_value(&v)))
            .collect();
        self
    }

    fn set_scope(&mut self, scope: &str, vars: HashMap<String, Value>) {
        let entry = self.variables.entry(scope.to_string()).or_default();
        for (k, v) in vars {
            entry.insert(k, Segment::from_value(&v));
        }
    }

    pub fn user_input(&self, name: &str) -> Option<&Segment> {
        self.user_inputs.get(name)
    }

    pub fn user_inputs(&self) -> &HashMap<String, Segment> {
        &self.user_inputs
    }

    /// Number of stored variables across all scopes.
    pub fn len(&self) -> usize {
        self.variables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store a value under `[scope, name]`. Longer selectors are rejected:
    /// nested fields are written as part of their parent object.
    pub fn add(&mut self, selector: &Selector, value: impl Into<Segment>) -> NodeResult<()> {
        if !selector.path().is_empty() {
            return Err(NodeError::InputValidationError(format!(
                "cannot write nested selector '{}'",
                selector
            )));
        }
        self.variables
            .entry(selector.node_id().to_string())
            .or_default()
            .insert(selector.variable_name().to_string(), value.into());
        Ok(())
    }

    /// Resolve a selector exactly within its scope.
    pub fn get(&self, selector: &Selector) -> NodeResult<Segment> {
        self.get_optional(selector)
            .ok_or_else(|| NodeError::VariableNotFound(selector.to_string()))
    }

    /// Like [`get`](Self::get), for callers that supply their own default.
    pub fn get_optional(&self, selector: &Selector) -> Option<Segment> {
        let mut current = self
            .variables
            .get(selector.node_id())?
            .get(selector.variable_name())?
            .clone();
        for field in selector.path() {
            current = current.field(field)?;
        }
        Some(current)
    }

    pub fn has(&self, selector: &Selector) -> bool {
        self.get_optional(selector).is_some()
    }

    /// Set node outputs as (node_id, key) -> value
    pub fn set_node_outputs(&mut self, node_id: &str, outputs: &HashMap<String, Segment>) {
        let scope = self.variables.entry(node_id.to_string()).or_default();
        for (key, val) in outputs {
            scope.insert(key.clone(), val.clone());
        }
    }

    /// Get all variables for a given node_id
    pub fn get_node_variables(&self, node_id: &str) -> HashMap<String, Segment> {
        self.variables.get(node_id).cloned().unwrap_or_default()
    }

    /// Nested JSON view of every scope.
    pub fn to_dict(&self) -> Value {
        Value::Object(
            self.variables
                .iter()
                .map(|(scope, vars)| {
                    let inner = vars
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_value()))
                        .collect();
                    (scope.clone(), Value::Object(inner))
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sel(s: &str) -> Selector {
        Selector::parse_str(s).unwrap()
    }

    #[test]
    fn test_variable_pool_basic() {
        let mut pool = VariablePool::new();
        pool.add(&sel("node1.output"), "hello").unwrap();
        assert_eq!(pool.get(&sel("node1.output")).unwrap(), Segment::from("hello"));
    }

    #[test]
    fn test_variable_pool_sys() {
        let pool = VariablePool::new().with_system_variables(HashMap::from([(
            "query".to_string(),
            json!("test query"),
        )]));
        assert!(pool.has(&sel("sys.query")));
        assert_eq!(
            pool.get(&sel("sys.query")).unwrap().to_display_string(),
            "test query"
        );
    }

    #[test]
    fn test_missing_selector_is_not_found() {
        let pool = VariablePool::new();
        let err = pool.get(&sel("nonexistent.var")).unwrap_err();
        assert!(matches!(err, NodeError::VariableNotFound(s) if s == "nonexistent.var"));
        assert!(!pool.has(&sel("nonexistent.var")));
    }

    #[test]
    fn test_no_fallback_across_scopes() {
        let pool = VariablePool::new()
            .with_environment_variables(HashMap::from([("key".to_string(), json!("env"))]));
        assert!(pool.get(&sel("conversation.key")).is_err());
        assert!(pool.get(&sel("env.key")).is_ok());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut pool = VariablePool::new();
        pool.add(&sel("n.obj"), Segment::from_value(&json!({"a": {"b": 1}})))
            .unwrap();
        let first = pool.get(&sel("n.obj.a.b")).unwrap();
        let second = pool.get(&sel("n.obj.a.b")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Segment::Integer(1));
        assert!(pool.get(&sel("n.obj.a.missing")).is_err());
    }

    #[test]
    fn test_nested_write_rejected() {
        let mut pool = VariablePool::new();
        assert!(pool.add(&sel("n.obj.field"), 1i64).is_err());
    }

    #[test]
    fn test_file_attributes() {
        let file = FileSegment {
            filename: Some("report.pdf".into()),
            size: Some(2048),
            transfer_method: "local_file".into(),
            related_id: Some("upload-1".into()),
            ..Default::default()
        };
        let mut pool = VariablePool::new();
        pool.add(&sel("start.doc"), Segment::File(file)).unwrap();
        assert_eq!(
            pool.get(&sel("start.doc.name")).unwrap(),
            Segment::from("report.pdf")
        );
        assert_eq!(pool.get(&sel("start.doc.size")).unwrap(), Segment::Integer(2048));
        assert!(pool.get(&sel("start.doc.bytes")).is_err());
    }

    #[test]
    fn test_set_node_outputs() {
        let mut pool = VariablePool::new();
        let outputs = HashMap::from([
            ("text".to_string(), Segment::from("result")),
            ("count".to_string(), Segment::Integer(42)),
        ]);
        pool.set_node_outputs("node_llm", &outputs);
        assert_eq!(pool.get_node_variables("node_llm").len(), 2);
        assert_eq!(pool.get(&sel("node_llm.count")).unwrap(), Segment::Integer(42));
    }

    #[test]
    fn test_to_dict_round_trip() {
        let mut pool = VariablePool::new()
            .with_system_variables(HashMap::from([("query".to_string(), json!("hi"))]));
        pool.add(&sel("llm.text"), "answer").unwrap();
        pool.add(&sel("llm.usage"), Segment::from_value(&json!({"tokens": 12})))
            .unwrap();

        let dict = pool.to_dict();
        assert_eq!(dict["sys"]["query"], json!("hi"));
        assert_eq!(dict["llm"], json!({"text": "answer", "usage": {"tokens": 12}}));

        let mut rebuilt = VariablePool::new();
        for (scope, vars) in dict.as_object().unwrap() {
            for (name, value) in vars.as_object().unwrap() {
                rebuilt
                    .add(&Selector::new(scope, name), Segment::from_value(value))
                    .unwrap();
            }
        }
        assert_eq!(rebuilt.to_dict(), dict);
    }

    #[test]
    fn test_from_value_array_inference() {
        assert!(matches!(
            Segment::from_value(&json!(["a", "b"])),
            Segment::ArrayString(_)
        ));
        assert!(matches!(Segment::from_value(&json!([1, 2])), Segment::Array(_)));
        assert!(matches!(Segment::from_value(&json!([])), Segment::Array(_)));
    }

    #[test]
    fn test_snapshot_keeps_variants() {
        let mut pool = VariablePool::new();
        pool.add(&sel("n.f"), Segment::Float(2.0)).unwrap();
        pool.add(&sel("n.file"), Segment::File(FileSegment::default()))
            .unwrap();
        let json = serde_json::to_string(&pool).unwrap();
        let restored: VariablePool = serde_json::from_str(&json).unwrap();
        assert!(matches!(restored.get(&sel("n.f")).unwrap(), Segment::Float(_)));
        assert!(matches!(restored.get(&sel("n.file")).unwrap(), Segment::File(_)));
        assert_eq!(restored, pool);
    }

    #[test]
    fn test_segment_type_matching() {
        assert_eq!(SegmentType::from_dsl_type("number"), Some(SegmentType::Number));
        assert_eq!(SegmentType::from_dsl_type("invalid"), None);
        assert!(Segment::Float(3.5).matches_type(&SegmentType::Number));
        assert!(!Segment::from("42").matches_type(&SegmentType::Number));
        assert!(Segment::from_value(&json!([1, 2])).matches_type(&SegmentType::ArrayNumber));
    }
}
