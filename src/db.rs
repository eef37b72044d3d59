use sqlx::{postgres::PgPoolOptions, PgPool};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS applicants (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL DEFAULT '',
    email       TEXT NOT NULL UNIQUE,
    phone       TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS loan_applications (
    id                  UUID PRIMARY KEY,
    applicant_id        UUID NOT NULL REFERENCES applicants (id),
    amount              NUMERIC(12, 2) NOT NULL CHECK (amount > 0),
    currency            CHAR(3) NOT NULL,
    term_months         INTEGER CHECK (term_months > 0),
    status              TEXT NOT NULL
                        CHECK (status IN ('pending', 'approved', 'rejected', 'manual_review')),
    risk_score          SMALLINT CHECK (risk_score BETWEEN 0 AND 100),
    score_source        TEXT CHECK (score_source IN ('FRESH', 'CACHED', 'FALLBACK')),
    decision            TEXT,
    fingerprint         TEXT,
    scored_at           TIMESTAMPTZ,
    external_reference  TEXT,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at          TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_loan_applications_applicant
    ON loan_applications (applicant_id);
CREATE INDEX IF NOT EXISTS idx_loan_applications_status
    ON loan_applications (status);
"#;

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        // Fail fast if the database is unreachable
        sqlx::query("SELECT 1").execute(&pool).await?;

        Ok(Self { pool })
    }

    /// Creates the applicant and application tables when missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}
