//! GBNF grammar generation from tool schemas.
//!
//! The grammar admits exactly two shapes of output: one or more
//! `<tool_call>{"name": ..., "arguments": {...}}</tool_call>` blocks whose
//! arguments conform to the tool's JSON schema, or free text that does not
//! start with `<`.
//!
//! Supported schema subset: `type` (single or array), `properties`,
//! `required`, `items`, `enum`, `const`, `anyOf`, `oneOf`. Schemas using
//! `$ref` or `allOf` are rejected rather than silently loosened.

use std::collections::HashSet;

use serde_json::Value;

use voxagent_core::error::AgentError;
use voxagent_core::types::ToolDefinition;

const PRIMITIVES: &str = r#"ws ::= [ \t\n]*
string ::= "\"" ( [^"\\\x00-\x1F] | "\\" ( ["\\/bfnrt] | "u" [0-9a-fA-F] [0-9a-fA-F] [0-9a-fA-F] [0-9a-fA-F] ) )* "\""
integer ::= "-"? ( "0" | [1-9] [0-9]* )
number ::= integer ( "." [0-9]+ )? ( [eE] [-+]? [0-9]+ )?
boolean ::= "true" | "false"
null ::= "null"
value ::= object | array | string | number | boolean | null
object ::= "{" ws ( string ws ":" ws value ( ws "," ws string ws ":" ws value )* )? ws "}"
array ::= "[" ws ( value ( ws "," ws value )* )? ws "]"
text ::= [^<] [^\x00]*"#;

/// Build a grammar constraining output to calls of `tools` or free text.
///
/// # Errors
/// `AgentError::Config` when `tools` is empty or a schema uses an
/// unsupported construct.
pub fn build_tool_grammar(tools: &[ToolDefinition]) -> Result<String, AgentError> {
    if tools.is_empty() {
        return Err(AgentError::config("grammar: no tools to constrain"));
    }

    let mut builder = GrammarBuilder::default();
    let mut call_rules = Vec::with_capacity(tools.len());

    for tool in tools {
        let base = format!("call-{}", sanitize(&tool.name));
        let args_rule = builder
            .visit(&tool.parameters, &format!("{base}-args"))
            .map_err(|e| AgentError::config(format!("grammar for tool '{}': {e}", tool.name)))?;
        let call_rule = builder.fresh(&base);
        builder.add(
            &call_rule,
            format!(
                r#""{{" ws "\"name\"" ws ":" ws {} ws "," ws "\"arguments\"" ws ":" ws {args_rule} ws "}}""#,
                literal(&Value::String(tool.name.clone()).to_string())
            ),
        );
        call_rules.push(call_rule);
    }

    let mut out = String::new();
    out.push_str("root ::= tool-calls | text\n");
    out.push_str("tool-calls ::= tool-call ( ws tool-call )*\n");
    out.push_str("tool-call ::= \"<tool_call>\\n\" ws call ws \"\\n</tool_call>\"\n");
    out.push_str(&format!("call ::= {}\n", call_rules.join(" | ")));
    for (name, body) in &builder.rules {
        out.push_str(&format!("{name} ::= {body}\n"));
    }
    out.push_str(PRIMITIVES);
    out.push('\n');
    Ok(out)
}

#[derive(Default)]
struct GrammarBuilder {
    rules: Vec<(String, String)>,
    names: HashSet<String>,
}

impl GrammarBuilder {
    fn fresh(&mut self, hint: &str) -> String {
        let mut name = hint.to_string();
        let mut n = 1;
        while self.names.contains(&name) || is_reserved(&name) {
            n += 1;
            name = format!("{hint}-{n}");
        }
        self.names.insert(name.clone());
        name
    }

    fn add(&mut self, name: &str, body: String) {
        self.rules.push((name.to_string(), body));
    }

    /// Returns the rule (or primitive) name matching `schema`.
    fn visit(&mut self, schema: &Value, hint: &str) -> Result<String, String> {
        let Some(obj) = schema.as_object() else {
            // `true`, `{}` written as non-object, or missing: anything goes.
            return Ok("value".to_string());
        };

        if obj.contains_key("$ref") {
            return Err("unsupported schema keyword `$ref`".into());
        }
        if obj.contains_key("allOf") {
            return Err("unsupported schema keyword `allOf`".into());
        }

        if let Some(constant) = obj.get("const") {
            return Ok(self.literal_rule(hint, std::slice::from_ref(constant)));
        }
        if let Some(values) = obj.get("enum") {
            let values = values
                .as_array()
                .filter(|v| !v.is_empty())
                .ok_or("`enum` must be a non-empty array")?;
            return Ok(self.literal_rule(hint, values));
        }

        for key in ["anyOf", "oneOf"] {
            if let Some(variants) = obj.get(key) {
                let variants = variants
                    .as_array()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| format!("`{key}` must be a non-empty array"))?;
                let mut alts = Vec::with_capacity(variants.len());
                for (i, variant) in variants.iter().enumerate() {
                    alts.push(self.visit(variant, &format!("{hint}-{i}"))?);
                }
                let name = self.fresh(hint);
                self.add(&name, alts.join(" | "));
                return Ok(name);
            }
        }

        match obj.get("type") {
            Some(Value::String(t)) => self.visit_type(t, obj, hint),
            Some(Value::Array(types)) => {
                let mut alts = Vec::with_capacity(types.len());
                for t in types {
                    let t = t.as_str().ok_or("`type` array must contain strings")?;
                    alts.push(self.visit_type(t, obj, &format!("{hint}-{t}"))?);
                }
                let name = self.fresh(hint);
                self.add(&name, alts.join(" | "));
                Ok(name)
            }
            Some(other) => Err(format!("invalid `type`: {other}")),
            None if obj.contains_key("properties") => self.visit_type("object", obj, hint),
            None => Ok("value".to_string()),
        }
    }

    fn visit_type(
        &mut self,
        t: &str,
        obj: &serde_json::Map<String, Value>,
        hint: &str,
    ) -> Result<String, String> {
        match t {
            "string" | "integer" | "number" | "boolean" | "null" => Ok(t.to_string()),
            "array" => {
                let item = match obj.get("items") {
                    Some(items) => self.visit(items, &format!("{hint}-item"))?,
                    None => "value".to_string(),
                };
                let name = self.fresh(hint);
                self.add(
                    &name,
                    format!(r#""[" ws ( {item} ( ws "," ws {item} )* )? ws "]""#),
                );
                Ok(name)
            }
            "object" => self.visit_object(obj, hint),
            other => Err(format!("unsupported type `{other}`")),
        }
    }

    fn visit_object(
        &mut self,
        obj: &serde_json::Map<String, Value>,
        hint: &str,
    ) -> Result<String, String> {
        let Some(props) = obj.get("properties").and_then(Value::as_object) else {
            return Ok("object".to_string());
        };
        if props.is_empty() {
            let name = self.fresh(hint);
            self.add(&name, r#""{" ws "}""#.to_string());
            return Ok(name);
        }

        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut required_kvs = Vec::new();
        for key in &required {
            let schema = props
                .get(*key)
                .ok_or_else(|| format!("required property `{key}` is not declared"))?;
            required_kvs.push(self.property(key, schema, hint)?);
        }
        let mut optional_kvs = Vec::new();
        for (key, schema) in props {
            if !required.contains(&key.as_str()) {
                optional_kvs.push(self.property(key, schema, hint)?);
            }
        }

        let body = if required_kvs.is_empty() {
            // Any non-empty ordered subset of the optional properties.
            let tails: Vec<String> = (0..optional_kvs.len())
                .map(|i| {
                    let mut tail = optional_kvs[i].clone();
                    for kv in &optional_kvs[i + 1..] {
                        tail.push_str(&format!(r#" ( ws "," ws {kv} )?"#));
                    }
                    format!("( {tail} )")
                })
                .collect();
            format!(r#""{{" ws ( {} )? ws "}}""#, tails.join(" | "))
        } else {
            let mut seq = required_kvs.join(r#" ws "," ws "#);
            for kv in &optional_kvs {
                seq.push_str(&format!(r#" ( ws "," ws {kv} )?"#));
            }
            format!(r#""{{" ws {seq} ws "}}""#)
        };

        let name = self.fresh(hint);
        self.add(&name, body);
        Ok(name)
    }

    fn property(&mut self, key: &str, schema: &Value, hint: &str) -> Result<String, String> {
        let value_rule = self.visit(schema, &format!("{hint}-{}", sanitize(key)))?;
        let key_json = Value::String(key.to_string()).to_string();
        Ok(format!(r#"{} ws ":" ws {value_rule}"#, literal(&key_json)))
    }

    fn literal_rule(&mut self, hint: &str, values: &[Value]) -> String {
        let alts: Vec<String> = values.iter().map(|v| literal(&v.to_string())).collect();
        let name = self.fresh(hint);
        self.add(&name, alts.join(" | "));
        name
    }
}

/// Quote `text` as a GBNF string literal.
fn literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Rule names allow `[a-z0-9-]` only.
fn sanitize(name: &str) -> String {
    let s: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if s.is_empty() {
        "x".to_string()
    } else {
        s
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        "root"
            | "tool-calls"
            | "tool-call"
            | "call"
            | "ws"
            | "string"
            | "integer"
            | "number"
            | "boolean"
            | "null"
            | "value"
            | "object"
            | "array"
            | "text"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, params: Value) -> ToolDefinition {
        ToolDefinition::new(name, "test tool", params)
    }

    fn rule<'a>(grammar: &'a str, name: &str) -> &'a str {
        let prefix = format!("{name} ::= ");
        grammar
            .lines()
            .find_map(|l| l.strip_prefix(prefix.as_str()))
            .unwrap_or_else(|| panic!("rule {name} missing in:\n{grammar}"))
    }

    #[test]
    fn test_root_allows_calls_or_text() {
        let g = build_tool_grammar(&[tool("exec", json!({"type": "object"}))]).unwrap();
        assert!(g.starts_with("root ::= tool-calls | text\n"));
        assert_eq!(rule(&g, "call"), "call-exec");
        assert!(rule(&g, "call-exec").contains(r#""\"exec\"""#));
        assert!(g.contains("text ::= [^<]"));
    }

    #[test]
    fn test_required_properties_come_first() {
        let g = build_tool_grammar(&[tool(
            "read_file",
            json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer"},
                    "path": {"type": "string"}
                },
                "required": ["path"]
            }),
        )])
        .unwrap();
        let args = rule(&g, "call-read-file-args");
        let path_at = args.find(r#""\"path\"""#).unwrap();
        let limit_at = args.find(r#""\"limit\"""#).unwrap();
        assert!(path_at < limit_at);
        assert!(args.contains(r#"( ws "," ws "\"limit\"" ws ":" ws integer )?"#));
    }

    #[test]
    fn test_all_optional_properties_alternate() {
        let g = build_tool_grammar(&[tool(
            "tasks",
            json!({
                "type": "object",
                "properties": {"a": {"type": "string"}, "b": {"type": "boolean"}}
            }),
        )])
        .unwrap();
        let args = rule(&g, "call-tasks-args");
        assert!(args.contains(" | "));
        assert!(args.ends_with(r#")? ws "}""#));
    }

    #[test]
    fn test_enum_and_array() {
        let g = build_tool_grammar(&[tool(
            "tasks",
            json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["create", "list"]},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["action"]
            }),
        )])
        .unwrap();
        assert_eq!(
            rule(&g, "call-tasks-args-action"),
            r#""\"create\"" | "\"list\"""#
        );
        assert!(rule(&g, "call-tasks-args-tags").contains("string ( ws \",\" ws string )*"));
    }

    #[test]
    fn test_type_array_and_any_of() {
        let g = build_tool_grammar(&[tool(
            "x",
            json!({
                "type": "object",
                "properties": {
                    "n": {"type": ["integer", "null"]},
                    "v": {"anyOf": [{"type": "string"}, {"type": "number"}]}
                },
                "required": ["n", "v"]
            }),
        )])
        .unwrap();
        assert_eq!(rule(&g, "call-x-args-n"), "integer | null");
        assert_eq!(rule(&g, "call-x-args-v"), "string | number");
    }

    #[test]
    fn test_unsupported_keywords_fail() {
        let with_ref = tool(
            "x",
            json!({"type": "object", "properties": {"a": {"$ref": "#/defs/a"}}}),
        );
        assert!(matches!(
            build_tool_grammar(&[with_ref]),
            Err(AgentError::Config(_))
        ));

        let with_all_of = tool("y", json!({"allOf": [{"type": "object"}]}));
        let err = build_tool_grammar(&[with_all_of]).unwrap_err();
        assert!(err.to_string().contains("allOf"));
    }

    #[test]
    fn test_empty_tool_list_fails() {
        assert!(build_tool_grammar(&[]).is_err());
    }

    #[test]
    fn test_rule_names_are_unique() {
        let g = build_tool_grammar(&[
            tool("a.b", json!({"type": "object", "properties": {"k": {"type": "array"}}})),
            tool("a-b", json!({"type": "object", "properties": {"k": {"type": "array"}}})),
        ])
        .unwrap();
        let mut names: Vec<&str> = g
            .lines()
            .filter_map(|l| l.split_once(" ::= ").map(|(n, _)| n))
            .collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
