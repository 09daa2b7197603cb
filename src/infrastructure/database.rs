use crate::entities::{project_entries, projects};
use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::env;
use std::time::Duration;
use tracing::info;

pub async fn setup_database() -> Result<DatabaseConnection> {
    let db_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    info!("📂 Database: {}", db_url);

    let mut opt = ConnectOptions::new(&db_url);
    opt.max_connections(20)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("✅ Database connected successfully");

    run_migrations(&db).await?;

    Ok(db)
}

pub async fn run_migrations(db: &DatabaseConnection) -> Result<()> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    info!("🔄 Running auto-migrations...");

    // Order matters for foreign keys: projects -> project_entries
    let stmts = vec![
        (
            "projects",
            schema
                .create_table_from_entity(projects::Entity)
                .if_not_exists()
                .to_owned(),
        ),
        (
            "project_entries",
            schema
                .create_table_from_entity(project_entries::Entity)
                .if_not_exists()
                .to_owned(),
        ),
    ];

    for (name, stmt) in stmts {
        let stmt = builder.build(&stmt);
        match db.execute(stmt).await {
            Ok(_) => info!("   - Table '{}' checked/created", name),
            Err(e) => tracing::warn!("   - Failed to create table '{}': {}", name, e),
        }
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_project_entries_project_id ON project_entries(project_id)",
        "CREATE INDEX IF NOT EXISTS idx_project_entries_parent_id ON project_entries(parent_id)",
    ];
    for query in indexes {
        if let Err(e) = db
            .execute(sea_orm::Statement::from_string(builder, query.to_owned()))
            .await
        {
            tracing::warn!("   - Index warning: {} -> {}", query, e);
        }
    }

    Ok(())
}
