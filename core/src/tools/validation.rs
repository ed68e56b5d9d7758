use serde_json::Value;

/// Arguments that do not fit the advertised schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
  #[error("arguments must be a JSON object")]
  NotAnObject,
  #[error("missing required argument `{0}`")]
  MissingField(String),
  #[error("argument `{field}` must be of type {expected}")]
  WrongType { field: String, expected: String },
}

/// Check `args` against the subset of JSON schema tools advertise:
/// object shape, `required` properties and primitive property types.
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), ValidationError> {
  let expects_object = schema
    .get("type")
    .and_then(Value::as_str)
    .is_none_or(|ty| ty == "object");
  if !expects_object {
    return Ok(());
  }
  let Some(fields) = args.as_object() else {
    return Err(ValidationError::NotAnObject);
  };

  if let Some(required) = schema.get("required").and_then(Value::as_array) {
    for name in required.iter().filter_map(Value::as_str) {
      if !fields.contains_key(name) {
        return Err(ValidationError::MissingField(name.to_string()));
      }
    }
  }

  let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
    return Ok(());
  };
  for (name, value) in fields {
    let Some(expected) = properties
      .get(name)
      .and_then(|property| property.get("type"))
      .and_then(Value::as_str)
    else {
      continue;
    };
    // Optional arguments sent as null are treated as absent.
    if value.is_null() {
      continue;
    }
    if !matches_type(expected, value) {
      return Err(ValidationError::WrongType {
        field: name.clone(),
        expected: expected.to_string(),
      });
    }
  }
  Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
  match expected {
    "string" => value.is_string(),
    "number" => value.is_number(),
    "integer" => value.is_i64() || value.is_u64(),
    "boolean" => value.is_boolean(),
    "array" => value.is_array(),
    "object" => value.is_object(),
    _ => true,
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  fn schema() -> Value {
    json!({
      "type": "object",
      "properties": {
        "path": { "type": "string" },
        "limit": { "type": "integer" },
        "recursive": { "type": "boolean" }
      },
      "required": ["path"]
    })
  }

  #[test]
  fn accepts_matching_arguments() {
    assert_eq!(
      validate_arguments(&schema(), &json!({ "path": ".", "limit": 3, "extra": [1] })),
      Ok(())
    );
  }

  #[test]
  fn rejects_missing_and_mistyped_arguments() {
    assert_eq!(
      validate_arguments(&schema(), &json!({ "limit": 3 })),
      Err(ValidationError::MissingField("path".to_string()))
    );
    assert_eq!(
      validate_arguments(&schema(), &json!({ "path": ".", "limit": 1.5 })),
      Err(ValidationError::WrongType {
        field: "limit".to_string(),
        expected: "integer".to_string(),
      })
    );
    assert_eq!(
      validate_arguments(&schema(), &json!("not an object")),
      Err(ValidationError::NotAnObject)
    );
  }

  #[test]
  fn schemaless_tools_accept_any_object() {
    assert_eq!(validate_arguments(&json!({}), &json!({ "q": 1 })), Ok(()));
  }
}
