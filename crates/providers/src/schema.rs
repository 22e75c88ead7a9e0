//! Tool schema adjustments for model families with stricter validators.

use rivet_core::provider::ToolDefinition;
use serde_json::Value;

/// Rewrite tool parameter schemas for `family`. Only Gemini needs changes:
/// enums must be strings and `required` may only name declared properties.
pub fn translate_tools(family: &str, tools: Vec<ToolDefinition>) -> Vec<ToolDefinition> {
    if family != "gemini" {
        return tools;
    }
    tools
        .into_iter()
        .map(|mut tool| {
            sanitize_gemini(&mut tool.parameters);
            tool
        })
        .collect()
}

fn sanitize_gemini(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };

    if let Some(Value::Array(values)) = obj.get_mut("enum") {
        if values.iter().any(|v| !v.is_string()) {
            for v in values.iter_mut() {
                if !v.is_string() {
                    *v = Value::String(v.to_string());
                }
            }
            obj.insert("type".into(), Value::String("string".into()));
        }
    }

    if let Some(Value::Object(props)) = obj.get_mut("properties") {
        for prop in props.values_mut() {
            sanitize_gemini(prop);
        }
    }

    let declared: Option<Vec<String>> = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|p| p.keys().cloned().collect());
    if let Some(Value::Array(required)) = obj.get_mut("required") {
        let declared = declared.unwrap_or_default();
        required.retain(|r| r.as_str().is_some_and(|k| declared.iter().any(|d| d == k)));
    }

    if let Some(items) = obj.get_mut("items") {
        sanitize_gemini(items);
    }
    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(variants)) = obj.get_mut(key) {
            for variant in variants.iter_mut() {
                sanitize_gemini(variant);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(parameters: Value) -> ToolDefinition {
        ToolDefinition {
            name: "t".into(),
            description: "d".into(),
            parameters,
        }
    }

    #[test]
    fn non_gemini_untouched() {
        let params = json!({"type": "object", "properties": {"n": {"type": "integer", "enum": [1, 2]}}});
        let out = translate_tools("claude", vec![tool(params.clone())]);
        assert_eq!(out[0].parameters, params);
    }

    #[test]
    fn integer_enums_become_strings() {
        let params = json!({
            "type": "object",
            "properties": {
                "level": {"type": "integer", "enum": [1, 2, 3]},
                "list": {"type": "array", "items": {"type": "number", "enum": [0.5]}}
            }
        });
        let out = translate_tools("gemini", vec![tool(params)]);
        let props = &out[0].parameters["properties"];
        assert_eq!(props["level"]["type"], "string");
        assert_eq!(props["level"]["enum"], json!(["1", "2", "3"]));
        assert_eq!(props["list"]["items"]["enum"], json!(["0.5"]));
    }

    #[test]
    fn required_filtered_to_declared_properties() {
        let params = json!({
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "required": ["path", "ghost"]
        });
        let out = translate_tools("gemini", vec![tool(params)]);
        assert_eq!(out[0].parameters["required"], json!(["path"]));
    }
}
