use serde_json::Value;

use super::error::FilterError;
use super::filter::is_identifier;
use super::types::{FilterOp, FilterWhereInfo, FilterWhereOptions};

/// Compiles the JSON where dialect into a parameterised SQL predicate.
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
    conditions: Vec<FilterWhereInfo>,
    raw_conditions: Vec<String>,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
            conditions: vec![],
            raw_conditions: vec![],
        }
    }

    pub fn generate(where_data: &Value, starting_param_index: usize, options: &FilterWhereOptions) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        filter_where.build(where_data, options)
    }

    pub fn generate_empty(options: &FilterWhereOptions) -> (String, Vec<Value>) {
        let where_clause = if options.excludes_deleted() {
            "\"deleted_at\" IS NULL".to_string()
        } else {
            "1=1".to_string()
        };
        (where_clause, vec![])
    }

    /// Only JSON objects (or null) are accepted. Raw SQL strings are refused so
    /// nothing can escape the top-level conjunction scoping adds.
    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            Value::String(_) => Err(FilterError::InvalidWhereClause("Raw SQL where clauses are not supported".to_string())),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build(&mut self, where_data: &Value, options: &FilterWhereOptions) -> Result<(String, Vec<Value>), FilterError> {
        self.parse_where_data(where_data)?;

        let mut sql_conditions = vec![];
        if options.excludes_deleted() { sql_conditions.push("\"deleted_at\" IS NULL".to_string()); }

        // Logical groups were compiled while parsing and already own their placeholders
        let mut field_conditions = vec![];
        for condition in std::mem::take(&mut self.conditions) {
            field_conditions.push(self.build_sql_condition(&condition)?);
        }
        sql_conditions.extend(field_conditions);
        sql_conditions.append(&mut self.raw_conditions);

        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, std::mem::take(&mut self.param_values)))
    }

    fn parse_where_data(&mut self, where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null => Ok(()),
            Value::Object(obj) => {
                for (key, value) in obj {
                    if key.starts_with('$') {
                        self.parse_logical_operator(key, value)?;
                    } else {
                        self.parse_field_condition(key, value)?;
                    }
                }
                Ok(())
            }
            _ => Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        }
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value) -> Result<(), FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                if arr.is_empty() {
                    // Empty conjunction is true, empty disjunction is false
                    self.raw_conditions.push(if op == "$and" { "1=1" } else { "1=0" }.to_string());
                    return Ok(());
                }
                let mut sql_parts = Vec::new();
                for v in arr {
                    let sql = self.generate_nested(v)?;
                    sql_parts.push(format!("({})", sql));
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                self.raw_conditions.push(format!("({})", sql_parts.join(joiner)));
                Ok(())
            }
            "$not" => {
                let sql = self.generate_nested(value)?;
                self.raw_conditions.push(format!("NOT ({})", sql));
                Ok(())
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn generate_nested(&mut self, value: &Value) -> Result<String, FilterError> {
        if !value.is_object() {
            return Err(FilterError::InvalidWhereClause("Logical operands must be objects".to_string()));
        }
        let (sql, params) = Self::generate(value, self.param_index, &FilterWhereOptions::default())?;
        self.param_index += params.len();
        self.param_values.extend(params);
        Ok(sql)
    }

    fn parse_field_condition(&mut self, field: &str, value: &Value) -> Result<(), FilterError> {
        if !is_identifier(field) {
            return Err(FilterError::InvalidColumn(format!("Invalid column name format: {}", field)));
        }
        match value {
            Value::Object(obj) if obj.keys().all(|k| k.starts_with('$')) && !obj.is_empty() => {
                for (op_key, op_val) in obj {
                    let operator = FilterOp::parse(op_key)
                        .ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                    self.conditions.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
                }
            }
            // Implicit equality: { field: value }
            _ => self.conditions.push(FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() }),
        }
        Ok(())
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", condition.column);
        let data = &condition.data;
        Ok(match condition.operator {
            FilterOp::Eq => {
                if data.is_null() { format!("{} IS NULL", quoted_column) }
                else { format!("{} = {}", quoted_column, self.param(data.clone())) }
            }
            FilterOp::Ne => {
                if data.is_null() { format!("{} IS NOT NULL", quoted_column) }
                else { format!("{} <> {}", quoted_column, self.param(data.clone())) }
            }
            FilterOp::Gt => format!("{} > {}", quoted_column, self.param(data.clone())),
            FilterOp::Gte => format!("{} >= {}", quoted_column, self.param(data.clone())),
            FilterOp::Lt => format!("{} < {}", quoted_column, self.param(data.clone())),
            FilterOp::Lte => format!("{} <= {}", quoted_column, self.param(data.clone())),
            FilterOp::Like => format!("{} LIKE {}", quoted_column, self.param(data.clone())),
            FilterOp::ILike => format!("{} ILIKE {}", quoted_column, self.param(data.clone())),
            FilterOp::In | FilterOp::NIn => {
                let negate = condition.operator == FilterOp::NIn;
                match data {
                    Value::Array(values) if values.is_empty() => {
                        if negate { "1=1".to_string() } else { "1=0".to_string() }
                    }
                    Value::Array(values) => {
                        let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                        let keyword = if negate { "NOT IN" } else { "IN" };
                        format!("{} {} ({})", quoted_column, keyword, params.join(", "))
                    }
                    other => {
                        let op = if negate { "<>" } else { "=" };
                        format!("{} {} {}", quoted_column, op, self.param(other.clone()))
                    }
                }
            }
            FilterOp::Between => match data {
                Value::Array(values) if values.len() == 2 => format!(
                    "{} BETWEEN {} AND {}",
                    quoted_column,
                    self.param(values[0].clone()),
                    self.param(values[1].clone())
                ),
                _ => return Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())),
            },
            FilterOp::Any => {
                let values = as_list(data);
                if values.is_empty() { return Ok("1=0".to_string()); }
                let params: Vec<String> = values.into_iter().map(|v| self.param(v)).collect();
                format!("{} && ARRAY[{}]", quoted_column, params.join(", "))
            }
            FilterOp::All => {
                let params: Vec<String> = as_list(data).into_iter().map(|v| self.param(v)).collect();
                format!("{} @> ARRAY[{}]", quoted_column, params.join(", "))
            }
            FilterOp::Size => format!("COALESCE(array_length({}, 1), 0) = {}", quoted_column, self.param(data.clone())),
            FilterOp::Null => match data {
                Value::Bool(true) => format!("{} IS NULL", quoted_column),
                Value::Bool(false) => format!("{} IS NOT NULL", quoted_column),
                _ => return Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
        })
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

fn as_list(data: &Value) -> Vec<Value> {
    match data {
        Value::Array(values) => values.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sql(where_data: Value) -> (String, Vec<Value>) {
        FilterWhere::generate(&where_data, 0, &FilterWhereOptions::default()).unwrap()
    }

    #[test]
    fn implicit_equality_and_operators() {
        let (clause, params) = sql(json!({ "amount": { "$gte": 10, "$lt": 100 }, "status": "pending" }));
        assert_eq!(clause, "\"amount\" >= $1 AND \"amount\" < $2 AND \"status\" = $3");
        assert_eq!(params, vec![json!(10), json!(100), json!("pending")]);
    }

    #[test]
    fn logical_groups_number_parameters_in_order() {
        let (clause, params) = sql(json!({
            "$or": [{ "status": "pending" }, { "status": "approved" }],
            "tenant_id": "Y1"
        }));
        assert_eq!(clause, "\"tenant_id\" = $3 AND ((\"status\" = $1) OR (\"status\" = $2))");
        assert_eq!(params, vec![json!("pending"), json!("approved"), json!("Y1")]);
    }

    #[test]
    fn nested_and_with_conflicting_tenant() {
        let (clause, params) = sql(json!({
            "$and": [{ "tenant_id": "Y2" }],
            "tenant_id": "Y1"
        }));
        assert_eq!(clause, "\"tenant_id\" = $2 AND ((\"tenant_id\" = $1))");
        assert_eq!(params, vec![json!("Y2"), json!("Y1")]);
    }

    #[test]
    fn empty_in_matches_nothing() {
        assert_eq!(sql(json!({ "id": { "$in": [] } })).0, "1=0");
        assert_eq!(sql(json!({ "id": { "$nin": [] } })).0, "1=1");
    }

    #[test]
    fn null_handling() {
        assert_eq!(sql(json!({ "approved_at": null })).0, "\"approved_at\" IS NULL");
        assert_eq!(sql(json!({ "approved_at": { "$null": false } })).0, "\"approved_at\" IS NOT NULL");
    }

    #[test]
    fn rejects_raw_sql_and_bad_columns() {
        assert!(FilterWhere::validate(&json!("1=1) OR (1=1")).is_err());
        assert!(FilterWhere::generate(&json!({ "a\" OR 1=1 --": 1 }), 0, &FilterWhereOptions::default()).is_err());
        assert!(FilterWhere::generate(&json!({ "$or": ["1=1"] }), 0, &FilterWhereOptions::default()).is_err());
        assert!(FilterWhere::generate(&json!({ "a": { "$regex": ".*" } }), 0, &FilterWhereOptions::default()).is_err());
    }

    #[test]
    fn soft_delete_guard_only_at_top_level() {
        let options = FilterWhereOptions { soft_delete: true, include_deleted: false };
        let (clause, _) = FilterWhere::generate(&json!({ "$not": { "status": "void" } }), 0, &options).unwrap();
        assert_eq!(clause, "\"deleted_at\" IS NULL AND NOT (\"status\" = $1)");

        let restore = FilterWhereOptions { soft_delete: true, include_deleted: true };
        assert_eq!(FilterWhere::generate_empty(&restore).0, "1=1");
    }
}
