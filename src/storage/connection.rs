use crate::storage::entity::{import_job, well_production};
use log::info;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema, Statement,
};
use std::time::Duration;

const INDEX_STATEMENTS: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_well_production_field_code ON well_production(field_code);",
    "CREATE INDEX IF NOT EXISTS idx_well_production_well_code ON well_production(well_code);",
    "CREATE INDEX IF NOT EXISTS idx_well_production_period ON well_production(production_period);",
];

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .idle_timeout(Duration::from_secs(60))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    // WAL：批量写入事务进行中，查询仍只读到已提交的数据
    if db.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
        db.execute(Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }

    ensure_schema(&db).await?;

    info!("Database connection established with WAL mode and schema initialized.");

    Ok(db)
}

/// 幂等：表和索引不存在时才创建，每次启动都可调用（产量表 + 任务历史表）
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let stmt = builder.build(
        schema
            .create_table_from_entity(well_production::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    let stmt = builder.build(
        schema
            .create_table_from_entity(import_job::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    for sql in INDEX_STATEMENTS {
        db.execute(Statement::from_string(builder, sql.to_string()))
            .await?;
    }

    Ok(())
}
