use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use sellerdesk_core::{
    AutoReplySettings, LinkedAccount, LinkedAccountId, NewLinkedAccount, SealedTokens, TenantId,
};

use super::AccountRepository;
use crate::error::{StoreError, map_sqlx_error};

pub(crate) const ACCOUNT_COLUMNS: &str = "id, tenant_id, external_user_id, login, access_token, \
     refresh_token, expires_at, auto_reply_enabled, auto_reply_text";

#[derive(Debug, Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn list_account_ids(&self) -> Result<Vec<LinkedAccountId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM linked_accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_account_ids", e))?;

        rows.iter()
            .map(|r| {
                r.try_get::<i64, _>("id")
                    .map(LinkedAccountId::new)
                    .map_err(|e| map_sqlx_error("list_account_ids", e))
            })
            .collect()
    }

    async fn get(&self, id: LinkedAccountId) -> Result<Option<LinkedAccount>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ACCOUNT_COLUMNS} FROM linked_accounts WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_account", e))?;

        row.map(|r| account_from_row(&r)).transpose()
    }

    #[instrument(skip(self, account), fields(tenant_id = %account.tenant_id, external_user_id = %account.external_user_id), err)]
    async fn link_account(&self, account: NewLinkedAccount) -> Result<LinkedAccount, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO linked_accounts
                (tenant_id, external_user_id, login, access_token, refresh_token, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, external_user_id) DO UPDATE
            SET login = EXCLUDED.login,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                expires_at = EXCLUDED.expires_at
            RETURNING {ACCOUNT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(*account.tenant_id.as_uuid())
            .bind(&account.external_user_id)
            .bind(&account.login)
            .bind(&account.tokens.access_token)
            .bind(&account.tokens.refresh_token)
            .bind(account.tokens.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("link_account", e))?;

        let linked = account_from_row(&row)?;
        info!(account_id = %linked.id, login = %linked.login, "account linked");
        Ok(linked)
    }

    async fn update_auto_reply(
        &self,
        id: LinkedAccountId,
        settings: &AutoReplySettings,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE linked_accounts SET auto_reply_enabled = $2, auto_reply_text = $3 WHERE id = $1",
        )
        .bind(id.get())
        .bind(settings.enabled)
        .bind(settings.text.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_auto_reply", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("linked account {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(account_id = %id), err)]
    async fn delete(&self, id: LinkedAccountId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM linked_accounts WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn accounts_for_tenant(&self, tenant_id: TenantId) -> Result<Vec<LinkedAccount>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM linked_accounts
            WHERE tenant_id = $1
               OR id IN (SELECT account_id FROM account_grants WHERE tenant_id = $1)
            ORDER BY id
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(*tenant_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("accounts_for_tenant", e))?;

        rows.iter().map(account_from_row).collect()
    }

    async fn grant_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO account_grants (tenant_id, account_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(*tenant_id.as_uuid())
        .bind(account_id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("grant_access", e))?;
        Ok(())
    }

    async fn has_access(&self, tenant_id: TenantId, account_id: LinkedAccountId) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM linked_accounts WHERE id = $2 AND tenant_id = $1
                UNION ALL
                SELECT 1 FROM account_grants WHERE account_id = $2 AND tenant_id = $1
            ) AS allowed
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(account_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("has_access", e))?;

        row.try_get("allowed").map_err(|e| map_sqlx_error("has_access", e))
    }

    async fn register_device(&self, tenant_id: TenantId, device_token: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO tenant_devices (tenant_id, device_token) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(*tenant_id.as_uuid())
        .bind(device_token)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_device", e))?;
        Ok(())
    }
}

pub(crate) fn account_from_row(row: &PgRow) -> Result<LinkedAccount, StoreError> {
    let decode = |e| map_sqlx_error("decode_account", e);
    let tenant: Uuid = row.try_get("tenant_id").map_err(decode)?;
    Ok(LinkedAccount {
        id: LinkedAccountId::new(row.try_get("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(tenant),
        external_user_id: row.try_get("external_user_id").map_err(decode)?,
        login: row.try_get("login").map_err(decode)?,
        tokens: SealedTokens {
            access_token: row.try_get("access_token").map_err(decode)?,
            refresh_token: row.try_get("refresh_token").map_err(decode)?,
            expires_at: row.try_get("expires_at").map_err(decode)?,
        },
        auto_reply: AutoReplySettings {
            enabled: row.try_get("auto_reply_enabled").map_err(decode)?,
            text: row.try_get("auto_reply_text").map_err(decode)?,
        },
    })
}
