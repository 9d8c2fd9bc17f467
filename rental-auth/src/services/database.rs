//! PostgreSQL storage for users and security audit events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, QueryBuilder};
use uuid::Uuid;

use super::credentials::{CredentialError, UserRepository};
use super::security_audit::{AuditFilter, AuditRepository};
use crate::models::{user::normalize_email, SecurityAuditEvent, User};

const USER_COLUMNS: &str = "user_id, email, password_hash, role_code, email_verified, \
     mfa_enabled, mfa_secret, display_name, created_utc, updated_utc, deleted_utc";

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn update_user(
        &self,
        sql: &str,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let result = sqlx::query(sql)
            .bind(user_id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| CredentialError::Storage(anyhow::anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepository for Database {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, CredentialError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_utc IS NULL"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Storage(anyhow::anyhow!(e)))
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, CredentialError> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE user_id = $1 AND deleted_utc IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CredentialError::Storage(anyhow::anyhow!(e)))
    }

    async fn create(&self, user: &User) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, password_hash, role_code, email_verified,
                               mfa_enabled, mfa_secret, display_name, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.role_code)
        .bind(user.email_verified)
        .bind(user.mfa_enabled)
        .bind(&user.mfa_secret)
        .bind(&user.display_name)
        .bind(user.created_utc)
        .bind(user.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                CredentialError::DuplicateEmail
            }
            other => CredentialError::Storage(anyhow::anyhow!(other)),
        })?;
        Ok(())
    }

    async fn update_password(
        &self,
        user_id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = $2, updated_utc = $3 \
             WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| CredentialError::Storage(anyhow::anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound);
        }
        Ok(())
    }

    async fn mark_email_verified(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        self.update_user(
            "UPDATE users SET email_verified = TRUE, updated_utc = $2 \
             WHERE user_id = $1 AND deleted_utc IS NULL",
            user_id,
            now,
        )
        .await
    }

    async fn enable_mfa(
        &self,
        user_id: Uuid,
        secret: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CredentialError> {
        let result = sqlx::query(
            "UPDATE users SET mfa_enabled = TRUE, mfa_secret = $2, updated_utc = $3 \
             WHERE user_id = $1 AND deleted_utc IS NULL",
        )
        .bind(user_id)
        .bind(secret)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| CredentialError::Storage(anyhow::anyhow!(e)))?;
        if result.rows_affected() == 0 {
            return Err(CredentialError::NotFound);
        }
        Ok(())
    }

    async fn disable_mfa(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.update_user(
            "UPDATE users SET mfa_enabled = FALSE, mfa_secret = NULL, updated_utc = $2 \
             WHERE user_id = $1 AND deleted_utc IS NULL",
            user_id,
            now,
        )
        .await
    }

    async fn soft_delete(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), CredentialError> {
        self.update_user(
            "UPDATE users SET deleted_utc = $2, updated_utc = $2 \
             WHERE user_id = $1 AND deleted_utc IS NULL",
            user_id,
            now,
        )
        .await
    }

    async fn health_check(&self) -> Result<(), CredentialError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                CredentialError::Storage(anyhow::anyhow!(e))
            })?;
        Ok(())
    }
}

#[derive(FromRow)]
struct AuditEventRow {
    event_id: Uuid,
    event_type_code: String,
    severity_code: String,
    user_id: Option<Uuid>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    details: sqlx::types::Json<serde_json::Value>,
    created_utc: DateTime<Utc>,
}

impl TryFrom<AuditEventRow> for SecurityAuditEvent {
    type Error = anyhow::Error;

    fn try_from(row: AuditEventRow) -> Result<Self, Self::Error> {
        Ok(SecurityAuditEvent {
            event_id: row.event_id,
            event_type: row.event_type_code.parse().map_err(anyhow::Error::msg)?,
            severity: row.severity_code.parse().map_err(anyhow::Error::msg)?,
            user_id: row.user_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            details: row.details.0,
            created_utc: row.created_utc,
        })
    }
}

#[async_trait]
impl AuditRepository for Database {
    async fn append(&self, event: &SecurityAuditEvent) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            INSERT INTO security_audit_events
                (event_id, event_type_code, severity_code, user_id, ip_address, user_agent,
                 details, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event.event_id)
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(event.user_id)
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(sqlx::types::Json(&event.details))
        .bind(event.created_utc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<SecurityAuditEvent>, anyhow::Error> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT event_id, event_type_code, severity_code, user_id, ip_address, user_agent, \
             details, created_utc FROM security_audit_events WHERE TRUE",
        );
        if let Some(user_id) = filter.user_id {
            qb.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(event_type) = filter.event_type {
            qb.push(" AND event_type_code = ")
                .push_bind(event_type.as_str());
        }
        if let Some(ip) = &filter.ip_address {
            qb.push(" AND ip_address = ").push_bind(ip.clone());
        }
        if let Some(from) = filter.from {
            qb.push(" AND created_utc >= ").push_bind(from);
        }
        if let Some(to) = filter.to {
            qb.push(" AND created_utc <= ").push_bind(to);
        }
        qb.push(" ORDER BY created_utc DESC LIMIT ")
            .push_bind(filter.limit);

        let rows: Vec<AuditEventRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(SecurityAuditEvent::try_from).collect()
    }
}
