//! Persistence gateway: typed reads/writes over the data model.
//!
//! The [`Gateway`] trait is the single storage seam. Two implementations:
//! - [`PgGateway`] — sqlx/Postgres, the production store.
//! - [`MemGateway`] — deterministic in-memory double used by scenario tests
//!   and by the daemon's test mode.
//!
//! # User scoping
//! Every per-user operation takes an explicit `user_id`. Reads scoped to a
//! user can never return another user's rows; mutations of a row owned by a
//! different user fail with [`DbError::Unauthorized`] so the caller can
//! count the incident.

pub mod gateway;
pub mod memory;
pub mod pg;

pub use gateway::{DbError, Gateway, JobFailure};
pub use memory::MemGateway;
pub use pg::PgGateway;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to Postgres using the given URL.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}
