use regex::Regex;
use std::sync::LazyLock;

use crate::core::variable_pool::{Selector, VariablePool};
use crate::error::NodeError;

static VARIABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{#([^#]+)#\}\}").expect("valid variable reference regex"));

/// Render `{{#node.var#}}` references against the pool.
///
/// In strict mode an unresolved reference is an error; otherwise it renders
/// as an empty string.
pub fn render_template(text: &str, pool: &VariablePool, strict: bool) -> Result<String, NodeError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for cap in VARIABLE_REF.captures_iter(text) {
        let whole = cap.get(0).map(|m| m.range()).unwrap_or(0..0);
        out.push_str(&text[last..whole.start]);
        last = whole.end;

        let raw = cap[1].trim();
        let resolved = Selector::parse_str(raw).and_then(|sel| pool.get_optional(&sel));
        match resolved {
            Some(seg) => out.push_str(&seg.to_display_string()),
            None if strict => return Err(NodeError::VariableNotFound(raw.to_string())),
            None => {}
        }
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Selectors referenced by a template, in order of appearance.
pub fn extract_selectors(text: &str) -> Vec<Selector> {
    VARIABLE_REF
        .captures_iter(text)
        .filter_map(|cap| Selector::parse_str(cap[1].trim()))
        .collect()
}
