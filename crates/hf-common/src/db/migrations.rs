use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use crate::db::PgPool;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "interview pipeline tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS jobs (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    id BIGSERIAL PRIMARY KEY,
    full_name TEXT,
    email TEXT
);

CREATE TABLE IF NOT EXISTS interview_stages (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    stage_order INTEGER NOT NULL UNIQUE,
    is_ai_automated BOOLEAN NOT NULL DEFAULT false
);

CREATE TABLE IF NOT EXISTS interview_candidates (
    id BIGSERIAL PRIMARY KEY,
    job_id BIGINT NOT NULL REFERENCES jobs(id),
    candidate_id BIGINT NOT NULL REFERENCES profiles(id),
    current_stage_id BIGINT REFERENCES interview_stages(id),
    ai_score DOUBLE PRECISION,
    ai_analysis JSONB,
    status TEXT NOT NULL DEFAULT 'active',
    resume_url TEXT,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (job_id, candidate_id),
    CONSTRAINT chk_candidate_status CHECK (status IN ('active', 'rejected', 'hired'))
);

CREATE INDEX IF NOT EXISTS idx_interview_candidates_job_status
    ON interview_candidates(job_id, status);

CREATE TABLE IF NOT EXISTS interview_events (
    id BIGSERIAL PRIMARY KEY,
    pipeline_record_id BIGINT NOT NULL REFERENCES interview_candidates(id) ON DELETE CASCADE,
    stage_id BIGINT NOT NULL REFERENCES interview_stages(id),
    status TEXT NOT NULL DEFAULT 'pending',
    ai_score DOUBLE PRECISION,
    ai_feedback JSONB,
    notes TEXT,
    scheduled_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (pipeline_record_id, stage_id),
    CONSTRAINT chk_event_status CHECK (
        status IN ('pending', 'scheduled', 'in_progress', 'completed', 'passed', 'failed')
    ),
    CONSTRAINT chk_event_score CHECK (ai_score IS NULL OR (ai_score >= 0 AND ai_score <= 100))
);

CREATE TABLE IF NOT EXISTS interview_invitations (
    id BIGSERIAL PRIMARY KEY,
    stage_event_id BIGINT NOT NULL REFERENCES interview_events(id) ON DELETE CASCADE,
    token TEXT NOT NULL UNIQUE,
    expires_at TIMESTAMPTZ NOT NULL,
    used_at TIMESTAMPTZ,
    email_status TEXT NOT NULL DEFAULT 'pending',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS interview_responses (
    id BIGSERIAL PRIMARY KEY,
    stage_event_id BIGINT NOT NULL REFERENCES interview_events(id) ON DELETE CASCADE,
    questions JSONB NOT NULL,
    answers JSONB NOT NULL DEFAULT '[]'::jsonb,
    correct_answers INTEGER,
    score DOUBLE PRECISION,
    started_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    completed_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_interview_responses_event
    ON interview_responses(stage_event_id);
"#,
    },
    Migration {
        id: 2,
        description: "seed default stage catalog",
        sql: r#"
INSERT INTO interview_stages (name, stage_order, is_ai_automated) VALUES
    ('Resume Screening', 1, true),
    ('AI Phone Interview', 2, true),
    ('Technical Assessment', 3, false),
    ('HR Round', 4, false),
    ('Viva', 5, false),
    ('Final Review', 6, false),
    ('Offer Stage', 7, false)
ON CONFLICT (stage_order) DO NOTHING;
"#,
    },
];

#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}
