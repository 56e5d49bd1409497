//! Database configuration module.
//!
//! This module handles `SQLite` database connection and table creation using `SeaORM`.
//! Tables are generated with `Schema::create_table_from_entity` from the entity
//! definitions, so the schema always matches the Rust structs without manual SQL.

use crate::entities::{
    Assignment, BlockedPair, Couple, CoursePairing, Envelope, Event, MatchPlan,
};
use crate::errors::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema};
use tracing::info;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/dinner_hop.sqlite?mode=rwc";

/// Resolves the database URL: `DATABASE_URL` first, then the configured value,
/// then a local `SQLite` file.
#[must_use]
pub fn get_database_url(configured: Option<&str>) -> String {
    std::env::var("DATABASE_URL")
        .ok()
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string())
}

/// Establishes a connection to the database at the resolved URL.
pub async fn create_connection(configured: Option<&str>) -> Result<DatabaseConnection> {
    let database_url = get_database_url(configured);
    info!("Connecting to database at {database_url}");
    Database::connect(&database_url).await.map_err(Into::into)
}

async fn create_table<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let builder = db.get_database_backend();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(builder.build(&statement)).await?;
    Ok(())
}

/// Creates every table the engine needs. Safe to call on an existing database.
pub async fn create_tables(db: &DatabaseConnection) -> Result<()> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, Event).await?;
    create_table(db, &schema, Couple).await?;
    create_table(db, &schema, Assignment).await?;
    create_table(db, &schema, BlockedPair).await?;
    create_table(db, &schema, MatchPlan).await?;
    create_table(db, &schema, CoursePairing).await?;
    create_table(db, &schema, Envelope).await?;

    Ok(())
}
