use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Scope holding system variables (`sys.query`, `sys.workflow_run_id`, ...).
pub const SYSTEM_VARIABLE_NODE_ID: &str = "sys";
/// Scope holding environment variables.
pub const ENVIRONMENT_VARIABLE_NODE_ID: &str = "env";
/// Scope holding conversation variables.
pub const CONVERSATION_VARIABLE_NODE_ID: &str = "conversation";

/// An ordered variable address: `[scope, name, field, subfield, ...]`.
///
/// The scope is either one of the reserved scopes above or a node id. A
/// selector always has at least two parts; anything past the second walks
/// into object fields or file attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    parts: Vec<String>,
}

impl Selector {
    pub fn new(node_id: impl Into<String>, variable_name: impl Into<String>) -> Self {
        Self {
            parts: vec![node_id.into(), variable_name.into()],
        }
    }

    pub fn parse_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(arr) => {
                let mut parts = Vec::with_capacity(arr.len());
                for v in arr {
                    parts.push(v.as_str()?.to_string());
                }
                Self::from_parts(parts)
            }
            Value::String(s) => Self::parse_str(s),
            _ => None,
        }
    }

    pub fn parse_str(selector: &str) -> Option<Self> {
        Self::from_parts(selector.split('.').map(|p| p.trim().to_string()).collect())
    }

    pub fn from_parts(parts: Vec<String>) -> Option<Self> {
        if parts.len() < 2 || parts.iter().any(|p| p.is_empty()) {
            return None;
        }
        Some(Self { parts })
    }

    /// Append a field segment, e.g. `node.obj` -> `node.obj.field`.
    pub fn node_id(&self) -> &str {
        &self.parts[0]
    }

    pub fn variable_name(&self) -> &str {
        &self.parts[1]
    }

    /// Field path below the variable itself.
    pub fn path(&self) -> &[String] {
        &self.parts[2..]
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

impl Serialize for Selector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.parts.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct SelectorVisitor;

        impl<'de> serde::de::Visitor<'de> for SelectorVisitor {
            type Value = Selector;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("selector string like 'node.var' or string array")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Selector::parse_str(v).ok_or_else(|| E::custom("invalid selector string"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut parts = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    parts.push(value);
                }
                Selector::from_parts(parts)
                    .ok_or_else(|| serde::de::Error::custom("invalid selector array"))
            }
        }

        deserializer.deserialize_any(SelectorVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_forms() {
        let a = Selector::parse_str("llm.text").unwrap();
        let b = Selector::parse_value(&json!(["llm", "text"])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.node_id(), "llm");
        assert_eq!(a.variable_name(), "text");
        assert!(a.path().is_empty());
    }

    #[test]
    fn test_nested_path() {
        let sel = Selector::parse_str("start.user.address.city").unwrap();
        assert_eq!(sel.path(), ["address".to_string(), "city".to_string()]);
        assert_eq!(sel.to_string(), "start.user.address.city");
    }

    #[test]
    fn test_rejects_short_or_empty() {
        assert!(Selector::parse_str("alone").is_none());
        assert!(Selector::parse_str("a..b").is_none());
        assert!(Selector::parse_value(&json!(["a", 1])).is_none());
        assert!(Selector::parse_value(&json!(42)).is_none());
    }

    #[test]
    fn test_serde_accepts_string_and_array() {
        let from_str: Selector = serde_json::from_value(json!("sys.query")).unwrap();
        let from_arr: Selector = serde_json::from_value(json!(["sys", "query"])).unwrap();
        assert_eq!(from_str, from_arr);
        assert_eq!(serde_json::to_value(&from_str).unwrap(), json!(["sys", "query"]));
    }
}
