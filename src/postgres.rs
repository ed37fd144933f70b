//! Postgres driver adapter, enabled with the `postgres` cargo feature.
//!
//! Each `acquire` opens a dedicated client; the client is closed when the
//! connection is dropped.

use std::error::Error;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionProvider, config::ConnectionConfig};
use crate::core::{OrmError, Result, Value};
use crate::result::QueryResult;
use crate::sql::{PlaceholderStyle, Statement};

/// Connection provider backed by a Postgres server.
pub struct PgConnectionProvider {
    config: ConnectionConfig,
    pg: tokio_postgres::Config,
}

impl PgConnectionProvider {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .dbname(&config.database)
            .user(&config.username)
            .connect_timeout(config.connect_timeout);
        if !config.password.is_empty() {
            pg.password(&config.password);
        }

        Ok(Self { config, pg })
    }

    pub fn from_url(url: &str) -> Result<Self> {
        Self::new(ConnectionConfig::from_url(url)?)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    type Connection = PgConnection;

    async fn acquire(&self) -> Result<PgConnection> {
        let (client, connection) = self
            .pg
            .connect(NoTls)
            .await
            .map_err(|e| OrmError::Connection(format!("{}: {}", self.config.to_url(), e)))?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "postgres connection closed with error");
            }
        });
        debug!(url = %self.config.to_url(), "opened postgres connection");

        Ok(PgConnection { client, driver })
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }
}

pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    fn params(statement: &Statement) -> Vec<&(dyn ToSql + Sync)> {
        statement
            .params()
            .iter()
            .map(|value| value as &(dyn ToSql + Sync))
            .collect()
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&mut self, statement: &Statement) -> Result<QueryResult> {
        let prepared = self
            .client
            .prepare(statement.sql())
            .await
            .map_err(query_error)?;
        let columns = prepared
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let rows = self
            .client
            .query(&prepared, &Self::params(statement))
            .await
            .map_err(query_error)?;

        let rows = rows
            .iter()
            .map(convert_row)
            .collect::<Result<Vec<_>>>()?;
        Ok(QueryResult::new(columns, rows))
    }

    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.client
            .execute(statement.sql(), &Self::params(statement))
            .await
            .map_err(query_error)
    }
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn query_error(err: tokio_postgres::Error) -> OrmError {
    OrmError::QueryExecution(err.to_string())
}

fn convert_row(row: &Row) -> Result<Vec<Value>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| convert_column(row, index, column.type_()))
        .collect()
}

fn convert_column(row: &Row, index: usize, ty: &Type) -> Result<Value> {
    let value = if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(index).map(Value::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(index).map(Value::from)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(index)
            .map(|v| Value::from(v.map(i64::from)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(index).map(Value::from)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(index)
            .map(|v| Value::from(v.map(f64::from)))
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME {
        row.try_get::<_, Option<String>>(index).map(Value::from)
    } else if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(index).map(Value::from)
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(index).map(Value::from)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(index).map(Value::from)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(index)
            .map(|v| Value::from(v.map(|t| t.and_utc())))
    } else {
        return Err(OrmError::TypeMismatch(format!(
            "unsupported postgres column type {}",
            ty
        )));
    };

    value.map_err(query_error)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Integer(i) => {
                if *ty == Type::INT2 {
                    i16::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    i32::try_from(*i)?.to_sql(ty, out)
                } else if *ty == Type::FLOAT8 {
                    (*i as f64).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::Float(f) => {
                if *ty == Type::FLOAT4 {
                    (*f as f32).to_sql(ty, out)
                } else {
                    f.to_sql(ty, out)
                }
            }
            // A textual key bound into uuid(...) arrives typed as UUID.
            Value::Text(s) if *ty == Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
            Value::Text(s) => s.to_sql(ty, out),
            Value::Boolean(b) => b.to_sql(ty, out),
            Value::Uuid(u) if *ty == Type::UUID => u.to_sql(ty, out),
            Value::Uuid(u) => u.to_string().to_sql(ty, out),
            Value::Timestamp(t) if *ty == Type::TIMESTAMP => t.naive_utc().to_sql(ty, out),
            Value::Timestamp(t) => t.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}
