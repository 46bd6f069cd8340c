//! Admin client that speaks SQL to the cluster.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::admin::{AdminClient, AdminError, AdminResult};
use crate::snapshot::{DnodeInfo, DnodeStatus, MnodeInfo, MnodeRole};

/// Column-named result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn column(&self, name: &str) -> AdminResult<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| AdminError::Malformed(format!("missing column `{name}`")))
    }

    /// Cell rendered as text; numbers are formatted, nulls are empty.
    pub fn text(&self, row: usize, col: usize) -> String {
        match self.rows.get(row).and_then(|r| r.get(col)) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn id(&self, row: usize, col: usize) -> AdminResult<u32> {
        let cell = self.rows.get(row).and_then(|r| r.get(col));
        let parsed = match cell {
            Some(Value::Number(n)) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| AdminError::Malformed(format!("row {row} has no numeric id")))
    }
}

/// Executes SQL against a node. Implemented by transports.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn query(&self, sql: &str) -> AdminResult<QueryResult>;

    async fn execute(&self, sql: &str) -> AdminResult<()> {
        self.query(sql).await.map(|_| ())
    }
}

/// [`AdminClient`] built from the cluster's administrative SQL statements.
pub struct SqlAdminClient<E> {
    executor: E,
    log_sql: bool,
}

impl<E: SqlExecutor> SqlAdminClient<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor,
            log_sql: false,
        }
    }

    /// Logs every statement at INFO instead of DEBUG.
    pub fn with_sql_logging(mut self, enabled: bool) -> Self {
        self.log_sql = enabled;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn trace(&self, sql: &str) {
        if self.log_sql {
            info!(target: "nodeherd::sql", "{sql};");
        } else {
            debug!(target: "nodeherd::sql", "{sql};");
        }
    }

    async fn query(&self, sql: &str) -> AdminResult<QueryResult> {
        self.trace(sql);
        self.executor.query(sql).await
    }

    async fn execute(&self, sql: &str) -> AdminResult<()> {
        self.trace(sql);
        self.executor.execute(sql).await
    }
}

fn quote(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl<E: SqlExecutor> AdminClient for SqlAdminClient<E> {
    async fn list_dnodes(&self) -> AdminResult<Vec<DnodeInfo>> {
        let result = self
            .query("select * from information_schema.ins_dnodes")
            .await?;
        let (id, endpoint, status) = (
            result.column("id")?,
            result.column("endpoint")?,
            result.column("status")?,
        );

        (0..result.rows.len())
            .map(|row| {
                Ok(DnodeInfo {
                    id: result.id(row, id)?,
                    endpoint: result.text(row, endpoint),
                    status: DnodeStatus::parse(&result.text(row, status)),
                })
            })
            .collect()
    }

    async fn list_mnodes(&self) -> AdminResult<Vec<MnodeInfo>> {
        let result = self
            .query("select * from information_schema.ins_mnodes")
            .await?;
        let (id, endpoint, role, status) = (
            result.column("id")?,
            result.column("endpoint")?,
            result.column("role")?,
            result.column("status")?,
        );

        (0..result.rows.len())
            .map(|row| {
                Ok(MnodeInfo {
                    id: result.id(row, id)?,
                    endpoint: result.text(row, endpoint),
                    role: MnodeRole::parse(&result.text(row, role)),
                    status: result.text(row, status),
                })
            })
            .collect()
    }

    async fn list_users(&self) -> AdminResult<Vec<String>> {
        let result = self.query("select * from information_schema.ins_users").await?;
        let name = result.column("name")?;
        Ok((0..result.rows.len()).map(|row| result.text(row, name)).collect())
    }

    async fn create_mnode(&self, dnode_id: u32) -> AdminResult<()> {
        if self.list_mnodes().await?.iter().any(|m| m.id == dnode_id) {
            return Err(AdminError::DuplicateMnode(dnode_id));
        }
        match self.execute(&format!("create mnode on dnode {dnode_id}")).await {
            Err(AdminError::Rejected { message, .. })
                if message.to_ascii_lowercase().contains("already exist") =>
            {
                Err(AdminError::DuplicateMnode(dnode_id))
            }
            other => other,
        }
    }

    async fn drop_dnode(&self, dnode_id: u32) -> AdminResult<()> {
        self.execute(&format!("drop dnode {dnode_id}")).await
    }

    async fn create_dnode(&self, endpoint: &str) -> AdminResult<()> {
        self.execute(&format!("create dnode \"{endpoint}\"")).await
    }

    async fn create_user(&self, name: &str, password: &str) -> AdminResult<()> {
        self.execute(&format!("create user {name} pass '{}'", quote(password)))
            .await
    }

    async fn list_qnodes(&self) -> AdminResult<Vec<u32>> {
        let result = self.query("select * from information_schema.ins_qnodes").await?;
        let id = result.column("id")?;
        (0..result.rows.len()).map(|row| result.id(row, id)).collect()
    }

    async fn create_qnode(&self, dnode_id: u32) -> AdminResult<()> {
        self.execute(&format!("create qnode on dnode {dnode_id}")).await
    }

    async fn alter_runtime_setting(&self, key: &str, value: &str) -> AdminResult<()> {
        self.execute(&format!("alter local \"{key}\" \"{value}\"")).await
    }

    async fn runtime_setting(&self, key: &str) -> AdminResult<Option<String>> {
        let result = self.query("show local variables").await?;
        let (name, value) = (result.column("name")?, result.column("value")?);
        Ok((0..result.rows.len())
            .find(|&row| result.text(row, name).eq_ignore_ascii_case(key))
            .map(|row| result.text(row, value)))
    }
}
