//! Usage totals: the only state that survives a restart.
//!
//! Counters live in a single Postgres row. Writes are fire-and-forget and
//! never fail a user-facing request; only the metrics read path surfaces
//! sink errors.

use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub enum Total {
    RoomsCreated,
    OtmCreated,
    FilesCreated,
    ChatInvitesCreated,
    ChatMessagesSent,
}

impl Total {
    fn column(self) -> &'static str {
        match self {
            Total::RoomsCreated => "rooms_created",
            Total::OtmCreated => "otm_created",
            Total::FilesCreated => "files_created",
            Total::ChatInvitesCreated => "chat_invites_created",
            Total::ChatMessagesSent => "chat_messages_sent",
        }
    }
}

#[derive(Debug, Error)]
pub enum TotalsError {
    #[error("totals sink is not configured")]
    Disabled,

    #[error("totals query failed: {0}")]
    Query(#[from] sqlx::Error),
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalsSnapshot {
    pub rooms_created: i64,
    pub otm_created: i64,
    pub files_created: i64,
    pub chat_invites_created: i64,
    pub chat_messages_sent: i64,
}

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS usage_totals (
    id SMALLINT PRIMARY KEY,
    rooms_created BIGINT NOT NULL DEFAULT 0,
    otm_created BIGINT NOT NULL DEFAULT 0,
    files_created BIGINT NOT NULL DEFAULT 0,
    chat_invites_created BIGINT NOT NULL DEFAULT 0,
    chat_messages_sent BIGINT NOT NULL DEFAULT 0
)";

const SEED_ROW: &str = "INSERT INTO usage_totals (id) VALUES (1) ON CONFLICT (id) DO NOTHING";

#[derive(Clone)]
pub struct TotalsSink {
    pool: Option<PgPool>,
}

impl TotalsSink {
    /// Sink with no backing store: increments are no-ops, reads yield
    /// [`TotalsError::Disabled`].
    pub fn disabled() -> Self {
        Self { pool: None }
    }

    /// Build a sink over a lazily-connected pool. An unparseable URL
    /// disables the sink rather than failing startup.
    pub fn new(database_url: Option<&str>) -> Self {
        let pool = database_url.and_then(|url| {
            match PgPoolOptions::new().max_connections(5).connect_lazy(url) {
                Ok(pool) => Some(pool),
                Err(error) => {
                    warn!(%error, "invalid totals sink url, usage totals disabled");
                    None
                }
            }
        });
        Self { pool }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_some()
    }

    /// Create the totals table and seed the single row with zeroed counters.
    /// Failures are logged; the server still starts.
    pub async fn ensure_schema(&self) {
        let Some(pool) = &self.pool else { return };

        let result = async {
            sqlx::query(CREATE_TABLE).execute(pool).await?;
            sqlx::query(SEED_ROW).execute(pool).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        if let Err(error) = result {
            warn!(%error, "failed to initialize usage totals schema");
        }
    }

    /// Fire-and-forget increment of one counter.
    pub fn increment(&self, total: Total) {
        let Some(pool) = self.pool.clone() else { return };

        tokio::spawn(async move {
            let sql = format!(
                "UPDATE usage_totals SET {column} = {column} + 1 WHERE id = 1",
                column = total.column()
            );
            if let Err(error) = sqlx::query(&sql).execute(&pool).await {
                warn!(%error, total = total.column(), "failed to increment usage total");
            }
        });
    }

    pub async fn read(&self) -> Result<TotalsSnapshot, TotalsError> {
        let pool = self.pool.as_ref().ok_or(TotalsError::Disabled)?;

        let row: (i64, i64, i64, i64, i64) = sqlx::query_as(
            "SELECT rooms_created, otm_created, files_created, \
             chat_invites_created, chat_messages_sent \
             FROM usage_totals WHERE id = 1",
        )
        .fetch_one(pool)
        .await?;

        Ok(TotalsSnapshot {
            rooms_created: row.0,
            otm_created: row.1,
            files_created: row.2,
            chat_invites_created: row.3,
            chat_messages_sent: row.4,
        })
    }
}
