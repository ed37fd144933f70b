use sqlparser::ast as sql_ast;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use uuid::Uuid;

use super::{Catalog, Table};
use crate::core::{Column, DataType, OrmError, Result, Row, Schema, Value};
use crate::result::QueryResult;

/// Rewrites `?` placeholders into `$1`, `$2`, ... so that both placeholder
/// styles reach the parser in the spelling Postgres uses. Quoted strings and
/// quoted identifiers are copied untouched.
pub(crate) fn number_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut position = 0;
    let mut quote: Option<char> = None;

    for ch in sql.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
                out.push(ch);
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    out.push(ch);
                }
                '?' => {
                    position += 1;
                    out.push('$');
                    out.push_str(&position.to_string());
                }
                _ => out.push(ch),
            },
        }
    }

    out
}

pub(crate) fn parse(sql: &str) -> Result<Vec<sql_ast::Statement>> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, &number_placeholders(sql))
        .map_err(|e| OrmError::QueryExecution(format!("syntax error: {}", e)))
}

/// Whether a parsed statement only reads.
pub(crate) fn is_query(statement: &sql_ast::Statement) -> bool {
    matches!(statement, sql_ast::Statement::Query(_))
}

/// Runs parsed statements against a catalog with one set of bound parameters.
pub(crate) struct Executor<'a> {
    params: &'a [Value],
}

impl<'a> Executor<'a> {
    pub(crate) fn new(params: &'a [Value]) -> Self {
        Self { params }
    }

    pub(crate) fn query(&self, catalog: &Catalog, statement: sql_ast::Statement) -> Result<QueryResult> {
        match statement {
            sql_ast::Statement::Query(query) => self.select(catalog, *query),
            other => Err(OrmError::QueryExecution(format!(
                "statement does not return rows: {}",
                other
            ))),
        }
    }

    /// Executes a modifying statement and returns the affected-row count.
    pub(crate) fn execute(&self, catalog: &mut Catalog, statement: sql_ast::Statement) -> Result<u64> {
        match statement {
            sql_ast::Statement::CreateTable(create) => {
                let name = table_name(&create.name)?;
                let columns = create
                    .columns
                    .iter()
                    .map(|def| {
                        let mut column = Column::new(def.name.value.clone(), convert_data_type(&def.data_type)?);
                        if def
                            .options
                            .iter()
                            .any(|opt| matches!(opt.option, sql_ast::ColumnOption::NotNull))
                        {
                            column = column.not_null();
                        }
                        Ok(column)
                    })
                    .collect::<Result<Vec<_>>>()?;
                catalog.create_table(Table::new(name, Schema::new(columns)), create.if_not_exists)?;
                Ok(0)
            }
            sql_ast::Statement::Drop { object_type, names, if_exists, .. } => {
                if !matches!(object_type, sql_ast::ObjectType::Table) {
                    return Err(OrmError::QueryExecution(format!(
                        "only DROP TABLE is supported, got {:?}",
                        object_type
                    )));
                }
                for name in &names {
                    catalog.drop_table(&table_name(name)?, if_exists)?;
                }
                Ok(0)
            }
            sql_ast::Statement::Insert(insert) => self.insert(catalog, insert),
            sql_ast::Statement::Update { table, assignments, selection, .. } => {
                self.update(catalog, table, assignments, selection)
            }
            sql_ast::Statement::Query(_) => Err(OrmError::QueryExecution(
                "SELECT must be run as a query".into(),
            )),
            other => Err(OrmError::QueryExecution(format!(
                "statement type not supported: {}",
                other
            ))),
        }
    }

    fn select(&self, catalog: &Catalog, query: sql_ast::Query) -> Result<QueryResult> {
        let sql_ast::SetExpr::Select(select) = *query.body else {
            return Err(OrmError::QueryExecution("only plain SELECT queries are supported".into()));
        };

        let [from] = select.from.as_slice() else {
            return Err(OrmError::QueryExecution("SELECT requires exactly one table".into()));
        };
        if !from.joins.is_empty() {
            return Err(OrmError::QueryExecution("joins are not supported".into()));
        }
        let sql_ast::TableFactor::Table { name, .. } = &from.relation else {
            return Err(OrmError::QueryExecution("complex table references are not supported".into()));
        };
        let table = catalog.get_table(&table_name(name)?)?;
        let schema = table.schema();

        // Resolve the projection into (label, expression) pairs up front.
        let mut projection: Vec<(String, Option<sql_ast::Expr>)> = Vec::new();
        for item in &select.projection {
            match item {
                sql_ast::SelectItem::Wildcard(_) => {
                    projection.extend(schema.column_names().into_iter().map(|name| (name, None)));
                }
                sql_ast::SelectItem::UnnamedExpr(expr) => {
                    let label = match expr {
                        sql_ast::Expr::Identifier(ident) => ident.value.clone(),
                        other => other.to_string(),
                    };
                    projection.push((label, Some(expr.clone())));
                }
                sql_ast::SelectItem::ExprWithAlias { expr, alias } => {
                    projection.push((alias.value.clone(), Some(expr.clone())));
                }
                other => {
                    return Err(OrmError::QueryExecution(format!(
                        "unsupported select item: {}",
                        other
                    )));
                }
            }
        }

        let mut rows = Vec::new();
        for row in table.rows() {
            if !self.matches(schema, row, select.selection.as_ref())? {
                continue;
            }
            let mut out = Vec::with_capacity(projection.len());
            for (label, expr) in &projection {
                let value = match expr {
                    Some(expr) => self.eval(schema, row, expr)?,
                    None => column_value(schema, row, label)?,
                };
                out.push(value);
            }
            rows.push(out);
        }

        let columns = projection.into_iter().map(|(label, _)| label).collect();
        Ok(QueryResult::new(columns, rows))
    }

    fn insert(&self, catalog: &mut Catalog, insert: sql_ast::Insert) -> Result<u64> {
        let table = catalog.get_table_mut(&insert.table.to_string())?;
        let schema = table.schema().clone();

        let targets = if insert.columns.is_empty() {
            (0..schema.column_count()).collect::<Vec<_>>()
        } else {
            insert
                .columns
                .iter()
                .map(|ident| {
                    schema.find_column_index(&ident.value).ok_or_else(|| {
                        OrmError::QueryExecution(format!(
                            "column \"{}\" of relation \"{}\" does not exist",
                            ident.value,
                            table.name()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        };

        let Some(source) = insert.source else {
            return Err(OrmError::QueryExecution("INSERT requires a VALUES clause".into()));
        };
        let sql_ast::SetExpr::Values(values) = *source.body else {
            return Err(OrmError::QueryExecution("only INSERT ... VALUES is supported".into()));
        };

        let empty: Row = vec![Value::Null; schema.column_count()];
        let mut inserted = 0;
        for exprs in values.rows {
            if exprs.len() != targets.len() {
                return Err(OrmError::QueryExecution(format!(
                    "INSERT has {} expressions but {} target columns",
                    exprs.len(),
                    targets.len()
                )));
            }
            let mut row = empty.clone();
            for (index, expr) in targets.iter().zip(exprs.iter()) {
                let value = self.eval(&schema, &empty, expr)?;
                row[*index] = coerce_literal(expr, value, schema.columns()[*index].data_type)?;
            }
            table.insert(row)?;
            inserted += 1;
        }

        Ok(inserted)
    }

    fn update(
        &self,
        catalog: &mut Catalog,
        table: sql_ast::TableWithJoins,
        assignments: Vec<sql_ast::Assignment>,
        selection: Option<sql_ast::Expr>,
    ) -> Result<u64> {
        let sql_ast::TableFactor::Table { name, .. } = table.relation else {
            return Err(OrmError::QueryExecution("complex table references are not supported".into()));
        };
        let table = catalog.get_table_mut(&table_name(&name)?)?;
        let schema = table.schema().clone();

        let assignments = assignments
            .into_iter()
            .map(|assign| {
                let column = match assign.target {
                    sql_ast::AssignmentTarget::ColumnName(col_name) if col_name.0.len() == 1 => {
                        col_name.0[0].to_string()
                    }
                    _ => {
                        return Err(OrmError::QueryExecution(
                            "only simple column names are supported in UPDATE".into(),
                        ));
                    }
                };
                let index = schema.find_column_index(&column).ok_or_else(|| {
                    OrmError::QueryExecution(format!(
                        "column \"{}\" of relation \"{}\" does not exist",
                        column,
                        table.name()
                    ))
                })?;
                Ok((index, assign.value))
            })
            .collect::<Result<Vec<_>>>()?;

        // Evaluate everything before touching storage so a failing row leaves
        // the table unchanged.
        let mut changes = Vec::new();
        for (row_index, row) in table.rows().iter().enumerate() {
            if !self.matches(&schema, row, selection.as_ref())? {
                continue;
            }
            let mut updated = row.clone();
            for (index, expr) in &assignments {
                let value = self.eval(&schema, row, expr)?;
                updated[*index] = coerce_literal(expr, value, schema.columns()[*index].data_type)?;
            }
            changes.push((row_index, updated));
        }

        let mut affected = 0;
        for (row_index, row) in changes {
            if table.update(row_index, row)? {
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn matches(&self, schema: &Schema, row: &Row, selection: Option<&sql_ast::Expr>) -> Result<bool> {
        match selection {
            None => Ok(true),
            Some(expr) => match self.eval(schema, row, expr)? {
                Value::Boolean(b) => Ok(b),
                Value::Null => Ok(false),
                other => Err(OrmError::QueryExecution(format!(
                    "argument of WHERE must be type boolean, not type {}",
                    other.type_name()
                ))),
            },
        }
    }

    fn eval(&self, schema: &Schema, row: &Row, expr: &sql_ast::Expr) -> Result<Value> {
        match expr {
            sql_ast::Expr::Identifier(ident) => column_value(schema, row, &ident.value),
            sql_ast::Expr::CompoundIdentifier(idents) => match idents.last() {
                Some(ident) => column_value(schema, row, &ident.value),
                None => Err(OrmError::QueryExecution("empty identifier".into())),
            },
            sql_ast::Expr::Value(val) => self.literal(&val.value),
            sql_ast::Expr::Nested(inner) => self.eval(schema, row, inner),
            sql_ast::Expr::UnaryOp { op: sql_ast::UnaryOperator::Minus, expr } => {
                match self.eval(schema, row, expr)? {
                    Value::Integer(i) => Ok(Value::Integer(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Null => Ok(Value::Null),
                    other => Err(OrmError::QueryExecution(format!(
                        "operator does not exist: - {}",
                        other.type_name().to_lowercase()
                    ))),
                }
            }
            sql_ast::Expr::IsNull(inner) => Ok(Value::Boolean(self.eval(schema, row, inner)?.is_null())),
            sql_ast::Expr::IsNotNull(inner) => {
                Ok(Value::Boolean(!self.eval(schema, row, inner)?.is_null()))
            }
            sql_ast::Expr::Cast { expr, data_type, .. } => {
                let value = self.eval(schema, row, expr)?;
                cast(value, convert_data_type(data_type)?)
            }
            sql_ast::Expr::Function(func) => self.function(schema, row, func),
            sql_ast::Expr::BinaryOp { left, op, right } => self.binary(schema, row, left, op, right),
            other => Err(OrmError::QueryExecution(format!(
                "unsupported expression: {}",
                other
            ))),
        }
    }

    fn literal(&self, value: &sql_ast::Value) -> Result<Value> {
        match value {
            sql_ast::Value::Number(n, _) => {
                if let Ok(i) = n.parse::<i64>() {
                    Ok(Value::Integer(i))
                } else if let Ok(f) = n.parse::<f64>() {
                    Ok(Value::Float(f))
                } else {
                    Err(OrmError::QueryExecution(format!("invalid number: {}", n)))
                }
            }
            sql_ast::Value::SingleQuotedString(s) => Ok(Value::Text(s.clone())),
            sql_ast::Value::Boolean(b) => Ok(Value::Boolean(*b)),
            sql_ast::Value::Null => Ok(Value::Null),
            sql_ast::Value::Placeholder(placeholder) => {
                let position = placeholder
                    .strip_prefix('$')
                    .and_then(|n| n.parse::<usize>().ok())
                    .ok_or_else(|| {
                        OrmError::QueryExecution(format!("unsupported placeholder {}", placeholder))
                    })?;
                position
                    .checked_sub(1)
                    .and_then(|index| self.params.get(index))
                    .cloned()
                    .ok_or_else(|| {
                        OrmError::QueryExecution(format!("there is no parameter {}", placeholder))
                    })
            }
            other => Err(OrmError::QueryExecution(format!("unsupported value: {}", other))),
        }
    }

    fn function(&self, schema: &Schema, row: &Row, func: &sql_ast::Function) -> Result<Value> {
        let name = func.name.to_string().to_lowercase();

        let args = match &func.args {
            sql_ast::FunctionArguments::List(arg_list) => arg_list
                .args
                .iter()
                .map(|arg| match arg {
                    sql_ast::FunctionArg::Unnamed(sql_ast::FunctionArgExpr::Expr(e)) => {
                        self.eval(schema, row, e)
                    }
                    _ => Err(OrmError::QueryExecution(
                        "only unnamed expression arguments are supported in functions".into(),
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        match (name.as_str(), args.as_slice()) {
            ("uuid", [value]) => cast(value.clone(), DataType::Uuid),
            ("lower", [Value::Text(s)]) => Ok(Value::Text(s.to_lowercase())),
            ("upper", [Value::Text(s)]) => Ok(Value::Text(s.to_uppercase())),
            ("lower" | "upper", [Value::Null]) => Ok(Value::Null),
            _ => Err(OrmError::QueryExecution(format!(
                "function {}({}) does not exist",
                name,
                args.iter().map(|a| a.type_name().to_lowercase()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    fn binary(
        &self,
        schema: &Schema,
        row: &Row,
        left: &sql_ast::Expr,
        op: &sql_ast::BinaryOperator,
        right: &sql_ast::Expr,
    ) -> Result<Value> {
        use sql_ast::BinaryOperator as SqlOp;

        match op {
            SqlOp::And | SqlOp::Or => {
                let l = as_bool(self.eval(schema, row, left)?)?;
                let r = as_bool(self.eval(schema, row, right)?)?;
                Ok(match (op, l, r) {
                    (SqlOp::And, Some(false), _) | (SqlOp::And, _, Some(false)) => Value::Boolean(false),
                    (SqlOp::And, Some(true), Some(true)) => Value::Boolean(true),
                    (SqlOp::Or, Some(true), _) | (SqlOp::Or, _, Some(true)) => Value::Boolean(true),
                    (SqlOp::Or, Some(false), Some(false)) => Value::Boolean(false),
                    _ => Value::Null,
                })
            }
            SqlOp::Eq | SqlOp::NotEq => {
                let l = self.eval(schema, row, left)?;
                let r = self.eval(schema, row, right)?;
                // String literals are untyped until compared, like in Postgres.
                let r = match l.data_type() {
                    Some(target) => coerce_literal(right, r, target)?,
                    None => r,
                };
                let l = match r.data_type() {
                    Some(target) => coerce_literal(left, l, target)?,
                    None => l,
                };
                Ok(match sql_equals(&l, &r)? {
                    Some(eq) => Value::Boolean(if matches!(op, SqlOp::Eq) { eq } else { !eq }),
                    None => Value::Null,
                })
            }
            other => Err(OrmError::QueryExecution(format!(
                "operator not supported: {}",
                other
            ))),
        }
    }
}

/// Equality with SQL typing: NULL yields unknown, numbers compare across
/// integer and float, any other mix of types is an error.
fn sql_equals(left: &Value, right: &Value) -> Result<Option<bool>> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(None),
        (Value::Integer(a), Value::Float(b)) | (Value::Float(b), Value::Integer(a)) => {
            Ok(Some((*a as f64) == *b))
        }
        (Value::Float(a), Value::Float(b)) => Ok(Some(a == b)),
        (a, b) if a.data_type() == b.data_type() => Ok(Some(a == b)),
        (a, b) => Err(OrmError::QueryExecution(format!(
            "operator does not exist: {} = {}",
            a.type_name().to_lowercase(),
            b.type_name().to_lowercase()
        ))),
    }
}

fn as_bool(value: Value) -> Result<Option<bool>> {
    match value {
        Value::Boolean(b) => Ok(Some(b)),
        Value::Null => Ok(None),
        other => Err(OrmError::QueryExecution(format!(
            "argument of AND/OR must be type boolean, not type {}",
            other.type_name().to_lowercase()
        ))),
    }
}

/// Gives a quoted string literal the type of the column it meets. Bound
/// parameters keep their own type.
fn coerce_literal(expr: &sql_ast::Expr, value: Value, target: DataType) -> Result<Value> {
    let is_string_literal = matches!(
        expr,
        sql_ast::Expr::Value(val) if matches!(val.value, sql_ast::Value::SingleQuotedString(_))
    );
    if is_string_literal && target != DataType::Text {
        cast(value, target)
    } else {
        Ok(value)
    }
}

fn cast(value: Value, target: DataType) -> Result<Value> {
    let invalid = |text: &str| {
        OrmError::QueryExecution(format!(
            "invalid input syntax for type {}: \"{}\"",
            target.to_string().to_lowercase(),
            text
        ))
    };

    match (target, value) {
        (_, Value::Null) => Ok(Value::Null),
        (DataType::Uuid, Value::Uuid(u)) => Ok(Value::Uuid(u)),
        (DataType::Uuid, Value::Text(s)) => Uuid::parse_str(s.trim())
            .map(Value::Uuid)
            .map_err(|_| invalid(&s)),
        (DataType::Integer, Value::Integer(i)) => Ok(Value::Integer(i)),
        (DataType::Integer, Value::Text(s)) => s.trim().parse().map(Value::Integer).map_err(|_| invalid(&s)),
        (DataType::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (DataType::Float, Value::Integer(i)) => Ok(Value::Float(i as f64)),
        (DataType::Float, Value::Text(s)) => s.trim().parse().map(Value::Float).map_err(|_| invalid(&s)),
        (DataType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
        (DataType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "1" => Ok(Value::Boolean(true)),
            "false" | "f" | "no" | "0" => Ok(Value::Boolean(false)),
            _ => Err(invalid(&s)),
        },
        (DataType::Timestamp, Value::Timestamp(t)) => Ok(Value::Timestamp(t)),
        (DataType::Timestamp, Value::Text(s)) => chrono::DateTime::parse_from_rfc3339(s.trim())
            .map(|t| Value::Timestamp(t.with_timezone(&chrono::Utc)))
            .map_err(|_| invalid(&s)),
        (DataType::Text, other) => Ok(Value::Text(match other {
            Value::Text(s) => s,
            Value::Uuid(u) => u.to_string(),
            Value::Timestamp(t) => t.to_rfc3339(),
            v => v.to_string(),
        })),
        (target, other) => Err(OrmError::QueryExecution(format!(
            "cannot cast type {} to {}",
            other.type_name().to_lowercase(),
            target.to_string().to_lowercase()
        ))),
    }
}

fn column_value(schema: &Schema, row: &Row, name: &str) -> Result<Value> {
    schema
        .find_column_index(name)
        .and_then(|index| row.get(index).cloned())
        .ok_or_else(|| OrmError::QueryExecution(format!("column \"{}\" does not exist", name)))
}

fn table_name(name: &sql_ast::ObjectName) -> Result<String> {
    name.0
        .last()
        .map(|ident| ident.to_string())
        .ok_or_else(|| OrmError::QueryExecution("invalid table name".into()))
}

fn convert_data_type(dt: &sql_ast::DataType) -> Result<DataType> {
    match dt {
        sql_ast::DataType::Int(_)
        | sql_ast::DataType::Integer(_)
        | sql_ast::DataType::BigInt(_)
        | sql_ast::DataType::SmallInt(_) => Ok(DataType::Integer),

        sql_ast::DataType::Float(_)
        | sql_ast::DataType::Double(_)
        | sql_ast::DataType::DoublePrecision
        | sql_ast::DataType::Real => Ok(DataType::Float),

        sql_ast::DataType::Text
        | sql_ast::DataType::Varchar(_)
        | sql_ast::DataType::Char(_)
        | sql_ast::DataType::String(_) => Ok(DataType::Text),

        sql_ast::DataType::Boolean | sql_ast::DataType::Bool => Ok(DataType::Boolean),

        sql_ast::DataType::Uuid => Ok(DataType::Uuid),

        sql_ast::DataType::Timestamp(_, _) => Ok(DataType::Timestamp),

        _ => Err(OrmError::TypeMismatch(format!("unsupported data type: {}", dt))),
    }
}
