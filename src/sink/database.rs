//! PostgreSQL writer
//!
//! Each delivery opens a fresh connection, runs one parameterized insert stamped with
//! the server's current time, and closes the connection again. A failure while closing
//! is logged and otherwise ignored, since the row is already committed.
//!
//! Expected table (name configurable via `database.table`):
//!
//! ```sql
//! CREATE TABLE cistern_volume (
//!     measured_at TIMESTAMPTZ      NOT NULL,
//!     liters      DOUBLE PRECISION NOT NULL
//! );
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tokio_postgres::NoTls;

use crate::config::DatabaseConfig;
use crate::error::{AppResult, CisternError};
use crate::measurement::VolumeMeasurement;
use crate::traits::MeasurementPublisher;

const SINK_NAME: &str = "database";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Inserts one row per measurement
#[derive(Clone)]
pub struct DatabaseWriter {
    config: tokio_postgres::Config,
    insert: String,
}

impl DatabaseWriter {
    /// # Errors
    ///
    /// `ConfigValidation` if the URL cannot be parsed.
    pub fn new(config: &DatabaseConfig) -> AppResult<Self> {
        let url = config.url.strip_prefix("jdbc:").unwrap_or(&config.url);
        let mut pg: tokio_postgres::Config = url.parse().map_err(|e| {
            CisternError::ConfigValidation(format!("Invalid database.url '{url}': {e}"))
        })?;
        pg.user(&config.user)
            .password(&config.password)
            .connect_timeout(CONNECT_TIMEOUT);

        Ok(Self {
            config: pg,
            insert: insert_statement(&config.table),
        })
    }

    /// The parameterized INSERT run for every delivery
    pub fn statement(&self) -> &str {
        &self.insert
    }
}

fn insert_statement(table: &str) -> String {
    format!("INSERT INTO {table} (measured_at, liters) VALUES (CURRENT_TIMESTAMP, $1)")
}

#[async_trait]
impl MeasurementPublisher for DatabaseWriter {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn deliver(&self, measurement: &VolumeMeasurement) -> AppResult<()> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| CisternError::delivery(SINK_NAME, e))?;
        let connection = tokio::spawn(connection);

        let liters = measurement.liters();
        let inserted = client.execute(self.insert.as_str(), &[&liters]).await;

        drop(client);
        match connection.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Error closing database connection"),
            Err(e) => tracing::warn!(error = %e, "Database connection task failed"),
        }

        let rows = inserted.map_err(|e| CisternError::delivery(SINK_NAME, e))?;
        tracing::debug!(rows, liters, "Stored cistern volume");
        Ok(())
    }
}
