// src/store/mod.rs
// Store connection management.
//
// Local file and :memory: stores use the embedded engine; libsql:// and
// https:// URLs go to a remote replica and require an auth token. For
// :memory: stores one anchor connection is kept open so the database is
// not dropped between connections.

pub mod loader;
pub mod schema;
pub mod writer;

use std::sync::Arc;

use libsql::{Builder, Connection, Database};
use tracing::info;

use crate::error::{AnalysisError, Result};

#[derive(Clone)]
pub struct PkdStore {
    db: Arc<Database>,
    _memory_anchor: Option<Arc<Connection>>,
}

impl PkdStore {
    /// Connect and bootstrap the schema.
    pub async fn connect(url: &str, auth_token: Option<&str>) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(AnalysisError::DataSource("database url is empty".into()));
        }

        let is_remote = url.starts_with("libsql://") || url.starts_with("https://");
        let is_memory = url.contains(":memory:");

        let db = if is_remote {
            let token = auth_token.ok_or_else(|| {
                AnalysisError::DataSource("remote store requires an auth token".into())
            })?;
            Builder::new_remote(url.to_string(), token.to_string())
                .build()
                .await
        } else {
            Builder::new_local(url).build().await
        }
        .map_err(|e| AnalysisError::DataSource(format!("store open failed: {}", e)))?;

        let db = Arc::new(db);
        let mut anchor = None;

        if is_memory {
            // Anchor must exist before any other connection or the schema
            // lands in a private memory segment.
            let conn = db
                .connect()
                .map_err(|e| AnalysisError::DataSource(format!("anchor connect failed: {}", e)))?;
            schema::apply_schema(&conn).await?;
            anchor = Some(Arc::new(conn));
        } else {
            let conn = db
                .connect()
                .map_err(|e| AnalysisError::DataSource(format!("bootstrap connect failed: {}", e)))?;
            schema::apply_schema(&conn).await?;
        }

        info!("Store ready at {}", url);
        Ok(Self {
            db,
            _memory_anchor: anchor,
        })
    }

    pub fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| AnalysisError::DataSource(format!("connection failed: {}", e)))
    }
}
