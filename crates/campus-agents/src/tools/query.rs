use async_trait::async_trait;
use campus_common::Result;
use campus_db::{QueryRows, SharedCampusStore};
use serde_json::json;
use tracing::debug;

use super::{Tool, ToolCategory, ToolContext, ToolOutput};

const DEFAULT_LIST_LIMIT: usize = 50;

/// Argument keys the naive reader refuses; they signal a query it cannot do.
const UNSUPPORTED_READER_ARGS: &[&str] = &[
    "filter", "filters", "where", "sort", "order_by", "group_by", "aggregate", "join",
];

fn rows_payload(rows: &QueryRows) -> serde_json::Value {
    json!({
        "columns": rows.columns,
        "rows": rows.rows,
        "count": rows.len(),
        "truncated": rows.truncated,
    })
}

/// Human summary; single-cell results are spelled out so narration can
/// quote the number.
fn summarize(rows: &QueryRows) -> String {
    if rows.len() == 1 && rows.columns.len() == 1 {
        let column = &rows.columns[0];
        let value = &rows.rows[0][column];
        return format!("查询成功：{column} = {value}");
    }
    format!("查询成功，共 {} 条记录", rows.len())
}

/// Parameterizable read-only SQL over the campus database.
pub struct AnyQueryTool {
    store: SharedCampusStore,
}

impl AnyQueryTool {
    pub fn new(store: SharedCampusStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for AnyQueryTool {
    fn name(&self) -> &'static str {
        "any_query"
    }

    fn description(&self) -> &'static str {
        "Run a read-only SQL SELECT against the campus database. Supports WHERE filters, \
         ORDER BY, GROUP BY, aggregates (COUNT/SUM/AVG) and JOINs. Tables: classes(id, name, \
         grade, capacity), students(id, name, gender, age, class_id, status), teachers(id, name, \
         subject, class_id, status), activities(id, title, activity_type, start_time, capacity, \
         status), enrollment_leads(id, parent_name, child_age, source, status, created_at). \
         Status values: students active/graduated, teachers active/resigned."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "sql": {
                    "type": "string",
                    "description": "A single SELECT (or WITH ... SELECT) statement. Use ?1, ?2 for parameters."
                },
                "params": {
                    "type": "array",
                    "description": "Positional parameter values."
                },
                "description": {
                    "type": "string",
                    "description": "What the query answers, in the user's language."
                }
            },
            "required": ["sql"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::DataQuery
    }

    fn weight(&self) -> i32 {
        8
    }

    async fn execute(&self, _context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        let sql = match input.get("sql").and_then(|v| v.as_str()) {
            Some(sql) if !sql.trim().is_empty() => sql,
            _ => return Ok(ToolOutput::error("missing 'sql' parameter")),
        };
        let params = match input.get("params") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(values)) => values.clone(),
            Some(_) => return Ok(ToolOutput::error("'params' must be an array")),
        };

        debug!(sql, params = params.len(), "running read-only query");
        let result = self.store.lock().await.query_readonly(sql, &params);
        match result {
            Ok(rows) => Ok(ToolOutput::success(summarize(&rows), rows_payload(&rows))),
            Err(e) => Ok(ToolOutput::error(format!("query rejected: {e}"))),
        }
    }
}

/// Lists one entity's rows without filtering. Cheap, but wrong for any
/// request that filters, sorts, aggregates or joins.
pub struct ReadDataRecordTool {
    store: SharedCampusStore,
}

impl ReadDataRecordTool {
    pub fn new(store: SharedCampusStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for ReadDataRecordTool {
    fn name(&self) -> &'static str {
        "read_data_record"
    }

    fn description(&self) -> &'static str {
        "List raw records of one entity (students, teachers, classes, activities, \
         enrollment_leads). No filtering, sorting or counting; use any_query for those."
    }

    fn input_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "entity": {
                    "type": "string",
                    "enum": ["students", "teachers", "classes", "activities", "enrollment_leads"]
                },
                "limit": { "type": "integer", "minimum": 1, "maximum": 500 }
            },
            "required": ["entity"]
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::DataQuery
    }

    fn weight(&self) -> i32 {
        3
    }

    async fn execute(&self, _context: &ToolContext, input: serde_json::Value) -> Result<ToolOutput> {
        if let Some(key) = UNSUPPORTED_READER_ARGS
            .iter()
            .find(|key| input.get(**key).is_some())
        {
            return Ok(ToolOutput::error(format!(
                "read_data_record does not support '{key}'; use any_query"
            )));
        }

        let Some(entity) = input.get("entity").and_then(|v| v.as_str()) else {
            return Ok(ToolOutput::error("missing 'entity' parameter"));
        };
        let limit = input
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIST_LIMIT);

        let result = self.store.lock().await.list_entity(entity, limit);
        match result {
            Ok(rows) => Ok(ToolOutput::success(summarize(&rows), rows_payload(&rows))),
            Err(e) => Ok(ToolOutput::error(e.to_string())),
        }
    }
}
