use db::{create_pool, run_migrations, SqlitePool};
use tempfile::TempDir;

/// File-backed database so every pooled connection sees the same schema.
pub async fn setup_test_db() -> (SqlitePool, TempDir) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("pipeline.db").display());
    let pool = create_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    (pool, dir)
}
