//! SQL transport over the cluster's HTTP REST endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::admin::{AdminError, AdminResult};
use crate::sql::{QueryResult, SqlExecutor};

/// Default REST port of the server's HTTP adapter.
pub const DEFAULT_REST_PORT: u16 = 6041;

#[derive(Debug, Deserialize)]
struct RestResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    column_meta: Vec<Vec<Value>>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

/// Posts statements to `http://<host>:<port>/rest/sql` with basic auth.
pub struct RestExecutor {
    client: reqwest::Client,
    url: String,
    user: String,
    password: String,
}

impl RestExecutor {
    pub fn new(host: &str, port: u16, timeout: Duration) -> AdminResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdminError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: format!("http://{host}:{port}/rest/sql"),
            user: "root".to_string(),
            password: "taosdata".to_string(),
        })
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn decode(sql: &str, body: &str) -> AdminResult<QueryResult> {
    let response: RestResponse =
        serde_json::from_str(body).map_err(|e| AdminError::Malformed(e.to_string()))?;

    if response.code != 0 {
        let message = response
            .desc
            .unwrap_or_else(|| format!("error code {:#x}", response.code));
        return Err(AdminError::rejected(sql, message));
    }

    let columns = response
        .column_meta
        .iter()
        .map(|meta| match meta.first() {
            Some(Value::String(name)) => Ok(name.clone()),
            _ => Err(AdminError::Malformed("column_meta entry without name".into())),
        })
        .collect::<AdminResult<Vec<_>>>()?;

    Ok(QueryResult::new(columns, response.data))
}

#[async_trait]
impl SqlExecutor for RestExecutor {
    async fn query(&self, sql: &str) -> AdminResult<QueryResult> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| AdminError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AdminError::Transport(e.to_string()))?;

        match decode(sql, &body) {
            Err(AdminError::Malformed(_)) if !status.is_success() => {
                Err(AdminError::Transport(format!("HTTP {status}")))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_result_set() {
        let body = r#"{
            "code": 0,
            "column_meta": [["id","SMALLINT",2],["endpoint","VARCHAR",134],["status","VARCHAR",10]],
            "data": [[1,"host:6030","ready"],[2,"host:6130","offline"]],
            "rows": 2
        }"#;

        let result = decode("select", body).unwrap();
        assert_eq!(result.columns, vec!["id", "endpoint", "status"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.text(1, 1), "host:6130");
        assert_eq!(result.id(1, 0).unwrap(), 2);
    }

    #[test]
    fn test_decode_rejection_keeps_server_message() {
        let body = r#"{"code":905,"desc":"Mnode already exists"}"#;

        match decode("create mnode on dnode 2", body) {
            Err(AdminError::Rejected { command, message }) => {
                assert_eq!(command, "create mnode on dnode 2");
                assert_eq!(message, "Mnode already exists");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        assert!(matches!(
            decode("select", "<html>502</html>"),
            Err(AdminError::Malformed(_))
        ));
    }

    #[test]
    fn test_url_layout() {
        let executor = RestExecutor::new("db-host", DEFAULT_REST_PORT, Duration::from_secs(5))
            .unwrap()
            .with_credentials("admin", "secret");
        assert_eq!(executor.url(), "http://db-host:6041/rest/sql");
    }
}
