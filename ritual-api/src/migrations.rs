use sqlx::{Pool, Postgres};

/// Inline startup schema. Statements run one by one and "already exists"
/// failures are ignored, so restarting against an initialized database is
/// harmless.
pub async fn run_inline_migrations(pool: &Pool<Postgres>) {
    tracing::info!("running inline migrations");

    let schema_sql = r#"
        CREATE TYPE provider_type AS ENUM ('paperspace');
        CREATE TABLE IF NOT EXISTS providers (
            provider provider_type PRIMARY KEY,
            key TEXT NOT NULL,
            email TEXT,
            password TEXT,
            auth_token TEXT,
            namespace TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE TABLE IF NOT EXISTS servers (
            id VARCHAR(255) PRIMARY KEY,
            name VARCHAR(30) NOT NULL,
            description TEXT,
            provider provider_type NOT NULL REFERENCES providers(provider),
            model TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
    "#;

    for statement in schema_sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            let _ = sqlx::query(stmt).execute(pool).await;
        }
    }
}
