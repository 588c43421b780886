use kvflags_lib::{Context, EvaluationDetail};
use serde_json::{Map, Value};

/// Rebuild `value` with the keys of every object in lexicographic order.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Body of a successful evaluation: the flag value under the flag's key, the
/// evaluation context, the evaluation detail and the service version, with
/// keys sorted at every level and a trailing newline.
pub fn render_evaluation(
    flag_key: &str,
    detail: &EvaluationDetail<String>,
    context: &Context,
    service_version: &str,
) -> serde_json::Result<String> {
    let mut body = Map::new();
    body.insert(flag_key.to_string(), Value::String(detail.value.clone()));
    body.insert("context".to_string(), serde_json::to_value(context)?);
    body.insert("reason".to_string(), serde_json::to_value(detail)?);
    body.insert(
        "service_version".to_string(),
        Value::String(service_version.to_string()),
    );
    let mut out = serde_json::to_string(&sort_keys(Value::Object(body)))?;
    out.push('\n');
    Ok(out)
}
