use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::models::ResolvedConfig;
use crate::utils::datasource::{
    ConnectorError, DataSourceConnector, Introspection, IntrospectionLimits, TableInfo,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub tables: Vec<TableInfo>,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// `GET /schema` body: a snapshot, or `{"unsupported": true}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SchemaResult {
    Schema(SchemaSnapshot),
    Unsupported { unsupported: bool },
}

impl SchemaResult {
    pub fn unsupported() -> Self {
        SchemaResult::Unsupported { unsupported: true }
    }

    fn degraded(error: &ConnectorError) -> Self {
        SchemaResult::Schema(SchemaSnapshot {
            tables: Vec::new(),
            truncated: true,
            warning: Some(error.to_string()),
        })
    }
}

/// Lists tables and columns within fixed caps. Never changes status.
#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    limits: IntrospectionLimits,
    timeout: Duration,
}

impl SchemaIntrospector {
    pub fn new(limits: IntrospectionLimits, timeout: Duration) -> Self {
        SchemaIntrospector { limits, timeout }
    }

    pub async fn introspect(&self, connector: &dyn DataSourceConnector, config: &ResolvedConfig) -> SchemaResult {
        if !config.source_type.supports_introspection() {
            return SchemaResult::unsupported();
        }

        let result = tokio::time::timeout(self.timeout, connector.introspect_schema(config, &self.limits)).await;
        match result {
            Ok(Ok(Introspection::Tables(tables))) => SchemaResult::Schema(apply_limits(tables, &self.limits)),
            Ok(Ok(Introspection::Unsupported)) => SchemaResult::unsupported(),
            Ok(Err(error)) => {
                warn!("⚠️ Schema introspection for {} failed: {}", config.source_type, error);
                SchemaResult::degraded(&error)
            }
            Err(_) => {
                warn!("⚠️ Schema introspection for {} timed out", config.source_type);
                SchemaResult::degraded(&ConnectorError::Timeout)
            }
        }
    }
}

/// Sort by name and enforce the table and column caps.
pub fn apply_limits(mut tables: Vec<TableInfo>, limits: &IntrospectionLimits) -> SchemaSnapshot {
    tables.sort_by(|a, b| a.name.cmp(&b.name));

    let mut truncated = tables.len() > limits.max_tables;
    tables.truncate(limits.max_tables);

    for table in &mut tables {
        if table.columns.len() > limits.max_columns {
            table.columns.truncate(limits.max_columns);
            table.columns_truncated = true;
            truncated = true;
        }
    }

    SchemaSnapshot {
        tables,
        truncated,
        warning: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::datasource::ColumnInfo;

    fn table(name: &str, columns: usize) -> TableInfo {
        TableInfo {
            columns: (0..columns)
                .map(|i| ColumnInfo {
                    name: format!("c{}", i),
                    data_type: "text".into(),
                })
                .collect(),
            ..TableInfo::new(name)
        }
    }

    #[test]
    fn caps_tables_and_flags_truncation() {
        let limits = IntrospectionLimits {
            max_tables: 2,
            max_columns: 10,
        };
        let snapshot = apply_limits(vec![table("c", 1), table("a", 1), table("b", 1)], &limits);
        assert!(snapshot.truncated);
        let names: Vec<_> = snapshot.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn caps_columns_per_table() {
        let limits = IntrospectionLimits {
            max_tables: 10,
            max_columns: 3,
        };
        let snapshot = apply_limits(vec![table("wide", 5), table("narrow", 2)], &limits);
        assert!(snapshot.truncated);
        let wide = snapshot.tables.iter().find(|t| t.name == "wide").unwrap();
        assert_eq!(wide.columns.len(), 3);
        assert!(wide.columns_truncated);
    }

    #[test]
    fn within_limits_is_not_truncated() {
        let limits = IntrospectionLimits {
            max_tables: 2,
            max_columns: 2,
        };
        assert!(!apply_limits(vec![table("a", 2)], &limits).truncated);
    }

    #[test]
    fn unsupported_serializes_as_flag() {
        let json = serde_json::to_value(SchemaResult::unsupported()).unwrap();
        assert_eq!(json, serde_json::json!({"unsupported": true}));
    }
}
