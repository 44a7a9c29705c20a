use serde_json::{Map, Value};

use super::data_source::DataSourceType;
use crate::utils::AppError;

/// Create or test-connection body: `type`, `name`, `description` plus the
/// type's connection fields, either flat or nested under `config`.
#[derive(Debug, Clone)]
pub struct NewDataSource {
    pub name: String,
    pub description: Option<String>,
    pub source_type: DataSourceType,
    pub fields: Map<String, Value>,
}

/// Update body. Absent keys leave the stored value alone.
#[derive(Debug, Clone, Default)]
pub struct DataSourceChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub fields: Map<String, Value>,
}

fn into_object(body: Value) -> Result<Map<String, Value>, AppError> {
    match body {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::BadRequest("Request body must be a JSON object".to_string())),
    }
}

fn optional_string(map: &mut Map<String, Value>, key: &str) -> Result<Option<String>, AppError> {
    match map.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(AppError::Validation(format!("{} must be a string", key))),
    }
}

/// Flatten a nested `config` object into the top-level fields.
fn connection_fields(mut map: Map<String, Value>) -> Result<Map<String, Value>, AppError> {
    match map.remove("config") {
        None | Some(Value::Null) => {}
        Some(Value::Object(nested)) => {
            for (key, value) in nested {
                map.entry(key).or_insert(value);
            }
        }
        Some(_) => return Err(AppError::Validation("config must be an object".to_string())),
    }
    map.remove("id");
    map.remove("status");
    Ok(map)
}

impl NewDataSource {
    pub fn from_body(body: Value) -> Result<Self, AppError> {
        let mut map = into_object(body)?;

        let source_type = optional_string(&mut map, "type")?
            .ok_or_else(|| AppError::Validation("type is required".to_string()))?
            .parse::<DataSourceType>()
            .map_err(AppError::Validation)?;
        let name = optional_string(&mut map, "name")?.unwrap_or_default();
        let description = optional_string(&mut map, "description")?;

        Ok(NewDataSource {
            name,
            description,
            source_type,
            fields: connection_fields(map)?,
        })
    }
}

impl DataSourceChanges {
    pub fn from_body(body: Value) -> Result<Self, AppError> {
        let mut map = into_object(body)?;
        if map.remove("type").is_some() {
            return Err(AppError::Validation("type cannot be changed".to_string()));
        }
        let name = optional_string(&mut map, "name")?;
        let description = optional_string(&mut map, "description")?;

        Ok(DataSourceChanges {
            name,
            description,
            fields: connection_fields(map)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_flat_and_nested_fields() {
        let flat = NewDataSource::from_body(json!({
            "type": "POSTGRESQL", "name": "db", "host": "h", "password": "p"
        }))
        .unwrap();
        assert_eq!(flat.source_type, DataSourceType::Postgresql);
        assert_eq!(flat.fields["host"], "h");

        let nested = NewDataSource::from_body(json!({
            "type": "rest_api", "name": "api", "config": {"endpoint": "https://x"}
        }))
        .unwrap();
        assert_eq!(nested.fields["endpoint"], "https://x");
        assert!(!nested.fields.contains_key("config"));
    }

    #[test]
    fn unknown_type_is_a_validation_error() {
        let err = NewDataSource::from_body(json!({"type": "ORACLE", "name": "x"})).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn changes_cannot_switch_type() {
        assert!(DataSourceChanges::from_body(json!({"type": "S3"})).is_err());
        let changes = DataSourceChanges::from_body(json!({"name": "renamed"})).unwrap();
        assert_eq!(changes.name.as_deref(), Some("renamed"));
        assert!(changes.fields.is_empty());
    }
}
