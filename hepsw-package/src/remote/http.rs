//! libSQL HTTP pipeline client

use super::{user_tables, RemoteStore, RemoteTable, RowSet, LIST_TABLES_SQL};
use crate::config::IndexConfig;
use crate::{PackageError, Result};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use parking_lot::{Condvar, Mutex};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Remote index reached over HTTP with a bearer token
pub struct HttpRemote {
    client: Client,
    pipeline_url: Url,
    auth_token: String,
    ping_timeout: Duration,
    schema_timeout: Duration,
    fetch_timeout: Duration,
    gate: ConnectionGate,
}

impl HttpRemote {
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let pipeline_url = pipeline_url(&config.database_url)?;
        let client = Client::builder()
            .connect_timeout(config.timeout())
            .pool_max_idle_per_host(config.remote_connections)
            .build()?;

        debug!("Remote index endpoint {}", pipeline_url);
        Ok(Self {
            client,
            pipeline_url,
            auth_token: config.auth_token.clone(),
            ping_timeout: config.timeout(),
            schema_timeout: config.schema_timeout(),
            fetch_timeout: config.fetch_timeout(),
            gate: ConnectionGate::new(config.remote_connections),
        })
    }

    fn execute(&self, sql: &str, params: &[Value], timeout: Duration) -> Result<RowSet> {
        let _permit = self.gate.acquire();

        let body = PipelineRequest {
            baton: None,
            requests: vec![
                StreamRequest::Execute {
                    stmt: Statement {
                        sql,
                        args: params.iter().map(WireValue::from).collect(),
                    },
                },
                StreamRequest::Close,
            ],
        };

        let response = self
            .client
            .post(self.pipeline_url.clone())
            .bearer_auth(&self.auth_token)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| PackageError::connection(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(PackageError::connection(format!(
                "remote index rejected credentials ({})",
                status
            )));
        }
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(PackageError::Remote {
                message: format!("HTTP {}: {}", status, text.trim()),
            });
        }

        let response: PipelineResponse = response.json()?;
        response.into_row_set()
    }
}

impl RemoteStore for HttpRemote {
    fn ping(&self) -> Result<()> {
        self.execute("SELECT 1", &[], self.ping_timeout).map(|_| ())
    }

    fn list_tables(&self) -> Result<Vec<RemoteTable>> {
        user_tables(self.execute(LIST_TABLES_SQL, &[], self.schema_timeout)?)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<RowSet> {
        self.execute(sql, params, self.fetch_timeout)
    }
}

/// Pipeline endpoint for a database URL; `libsql://` maps to `https://`
fn pipeline_url(database_url: &str) -> Result<Url> {
    let database_url = database_url.trim();
    let normalized = match database_url.strip_prefix("libsql://") {
        Some(rest) => format!("https://{}", rest),
        None => database_url.to_string(),
    };

    let invalid = || PackageError::InvalidValue {
        kind: "index URL",
        value: database_url.to_string(),
    };

    let mut url = Url::parse(&normalized).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .push("v2")
        .push("pipeline");
    Ok(url)
}

/// Caps the number of requests in flight
struct ConnectionGate {
    in_use: Mutex<usize>,
    released: Condvar,
    limit: usize,
}

struct GatePermit<'a> {
    gate: &'a ConnectionGate,
}

impl ConnectionGate {
    fn new(limit: usize) -> Self {
        Self {
            in_use: Mutex::new(0),
            released: Condvar::new(),
            limit: limit.max(1),
        }
    }

    fn acquire(&self) -> GatePermit<'_> {
        let mut in_use = self.in_use.lock();
        while *in_use >= self.limit {
            self.released.wait(&mut in_use);
        }
        *in_use += 1;
        GatePermit { gate: self }
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        *self.gate.in_use.lock() -= 1;
        self.gate.released.notify_one();
    }
}

#[derive(Serialize)]
struct PipelineRequest<'a> {
    baton: Option<String>,
    requests: Vec<StreamRequest<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamRequest<'a> {
    Execute { stmt: Statement<'a> },
    Close,
}

#[derive(Serialize)]
struct Statement<'a> {
    sql: &'a str,
    args: Vec<WireValue>,
}

#[derive(Deserialize)]
struct PipelineResponse {
    results: Vec<StreamResult>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: StreamError },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamResponse {
    Execute { result: ExecuteResult },
    Close,
}

#[derive(Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Deserialize)]
struct ExecuteResult {
    cols: Vec<Column>,
    rows: Vec<Vec<WireValue>>,
}

#[derive(Deserialize)]
struct Column {
    name: Option<String>,
}

impl PipelineResponse {
    fn into_row_set(self) -> Result<RowSet> {
        let first = self.results.into_iter().next().ok_or_else(|| PackageError::Remote {
            message: "empty pipeline response".to_string(),
        })?;

        let result = match first {
            StreamResult::Ok {
                response: StreamResponse::Execute { result },
            } => result,
            StreamResult::Ok { .. } => {
                return Err(PackageError::Remote {
                    message: "unexpected pipeline response".to_string(),
                })
            }
            StreamResult::Error { error } => {
                return Err(PackageError::Remote {
                    message: error.message,
                })
            }
        };

        let columns = result
            .cols
            .into_iter()
            .map(|c| c.name.unwrap_or_default())
            .collect();
        let rows = result
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(Value::try_from).collect())
            .collect::<Result<Vec<Vec<Value>>>>()?;

        Ok(RowSet { columns, rows })
    }
}

/// Value encoding of the pipeline protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => WireValue::Null,
            Value::Integer(i) => WireValue::Integer {
                value: i.to_string(),
            },
            Value::Real(f) => WireValue::Float { value: *f },
            Value::Text(s) => WireValue::Text { value: s.clone() },
            Value::Blob(b) => WireValue::Blob {
                base64: STANDARD_NO_PAD.encode(b),
            },
        }
    }
}

impl TryFrom<WireValue> for Value {
    type Error = PackageError;

    fn try_from(value: WireValue) -> Result<Self> {
        Ok(match value {
            WireValue::Null => Value::Null,
            WireValue::Integer { value } => {
                Value::Integer(value.parse().map_err(|_| PackageError::Remote {
                    message: format!("invalid integer value {:?}", value),
                })?)
            }
            WireValue::Float { value } => Value::Real(value),
            WireValue::Text { value } => Value::Text(value),
            WireValue::Blob { base64 } => Value::Blob(
                STANDARD_NO_PAD
                    .decode(base64.trim_end_matches('='))
                    .map_err(|e| PackageError::Remote {
                        message: format!("invalid blob value: {}", e),
                    })?,
            ),
        })
    }
}
