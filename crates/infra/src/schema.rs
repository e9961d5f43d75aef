//! Postgres schema bootstrap.
//!
//! Every statement is idempotent, so `apply` can run on every deploy.

use sqlx::PgPool;
use tracing::info;

use crate::error::{StoreError, map_sqlx_error};

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS linked_accounts (
    id                  BIGSERIAL PRIMARY KEY,
    tenant_id           UUID        NOT NULL,
    external_user_id    TEXT        NOT NULL,
    login               TEXT        NOT NULL,
    access_token        TEXT        NOT NULL,
    refresh_token       TEXT        NOT NULL,
    expires_at          TIMESTAMPTZ NOT NULL,
    auto_reply_enabled  BOOLEAN     NOT NULL DEFAULT FALSE,
    auto_reply_text     TEXT        NULL,
    created_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (tenant_id, external_user_id)
);

CREATE TABLE IF NOT EXISTS tenant_devices (
    tenant_id     UUID NOT NULL,
    device_token  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, device_token)
);

CREATE TABLE IF NOT EXISTS account_grants (
    tenant_id   UUID   NOT NULL,
    account_id  BIGINT NOT NULL REFERENCES linked_accounts(id) ON DELETE CASCADE,
    PRIMARY KEY (tenant_id, account_id)
);

CREATE TABLE IF NOT EXISTS task_queue (
    id            BIGSERIAL PRIMARY KEY,
    account_id    BIGINT      NOT NULL REFERENCES linked_accounts(id) ON DELETE CASCADE,
    status        TEXT        NOT NULL DEFAULT 'pending'
                  CHECK (status IN ('pending', 'processing', 'done', 'failed')),
    created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
    claimed_at    TIMESTAMPTZ NULL,
    processed_at  TIMESTAMPTZ NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS task_queue_one_active_per_account
    ON task_queue (account_id)
    WHERE status IN ('pending', 'processing');

CREATE INDEX IF NOT EXISTS task_queue_pending_fifo
    ON task_queue (created_at, id)
    WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS auto_reply_log (
    conversation_id  TEXT        NOT NULL,
    account_id       BIGINT      NOT NULL REFERENCES linked_accounts(id) ON DELETE CASCADE,
    handled_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (conversation_id, account_id)
);

CREATE INDEX IF NOT EXISTS auto_reply_log_handled_at ON auto_reply_log (handled_at);

CREATE TABLE IF NOT EXISTS message_metadata (
    id               BIGSERIAL PRIMARY KEY,
    account_id       BIGINT      NOT NULL REFERENCES linked_accounts(id) ON DELETE CASCADE,
    conversation_id  TEXT        NOT NULL,
    message_id       TEXT        NULL,
    author_role      TEXT        NOT NULL,
    notified         BOOLEAN     NOT NULL,
    replied          BOOLEAN     NOT NULL,
    recorded_at      TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS message_metadata_recorded_at ON message_metadata (recorded_at);
"#;

pub async fn apply(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    info!("schema applied");
    Ok(())
}
