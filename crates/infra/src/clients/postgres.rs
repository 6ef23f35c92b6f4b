//! Postgres-backed client repository (`clients` table).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use clientdesk_clients::Client;
use clientdesk_core::{ClientId, Page, PageRequest, UserId};

use super::ClientRepository;
use crate::repository::{RepositoryError, map_sqlx_error};

// Amounts are numeric(15, 2) in the table and f64 in the domain.
const CLIENT_COLUMNS: &str = r#"
    id, name, salary::float8 AS salary, company_value::float8 AS company_value,
    created_by, created_at, updated_at, deleted_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresClientRepository {
    pool: Arc<PgPool>,
}

impl PostgresClientRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

#[async_trait]
impl ClientRepository for PostgresClientRepository {
    #[instrument(skip(self, client), fields(client_id = %client.id), err)]
    async fn insert(&self, client: &Client) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO clients
                (id, name, salary, company_value, created_by, created_at, updated_at, deleted_at)
            VALUES ($1, $2, ROUND($3::numeric, 2), ROUND($4::numeric, 2), $5, $6, $7, $8)
            "#,
        )
        .bind(client.id.as_uuid())
        .bind(&client.name)
        .bind(client.salary)
        .bind(client.company_value)
        .bind(client.created_by.as_uuid())
        .bind(client.created_at)
        .bind(client.updated_at)
        .bind(client.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_client", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(client_id = %id), err)]
    async fn get(&self, id: ClientId) -> Result<Option<Client>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_client", e))?;

        row.map(|row| ClientRow::from_row(&row).map(Client::from))
            .transpose()
            .map_err(|e| map_sqlx_error("decode_client", e))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, page: PageRequest) -> Result<Page<Client>, RepositoryError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM clients WHERE deleted_at IS NULL")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_clients", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {CLIENT_COLUMNS} FROM clients
            WHERE deleted_at IS NULL
            ORDER BY updated_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(i64::from(page.limit))
        .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_clients", e))?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let row = ClientRow::from_row(&row).map_err(|e| map_sqlx_error("decode_client", e))?;
            items.push(row.into());
        }
        Ok(Page::new(total.max(0) as u64, items))
    }

    #[instrument(skip(self, client), fields(client_id = %client.id), err)]
    async fn save(&self, client: &Client) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE clients
            SET name = $2,
                salary = ROUND($3::numeric, 2),
                company_value = ROUND($4::numeric, 2),
                updated_at = $5,
                deleted_at = $6
            WHERE id = $1
            "#,
        )
        .bind(client.id.as_uuid())
        .bind(&client.name)
        .bind(client.salary)
        .bind(client.company_value)
        .bind(client.updated_at)
        .bind(client.deleted_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_client", e))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Storage(format!("client {} does not exist", client.id)));
        }
        Ok(())
    }
}

struct ClientRow {
    id: uuid::Uuid,
    name: String,
    salary: f64,
    company_value: f64,
    created_by: uuid::Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for ClientRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(ClientRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            salary: row.try_get("salary")?,
            company_value: row.try_get("company_value")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            id: ClientId::from_uuid(row.id),
            name: row.name,
            salary: row.salary,
            company_value: row.company_value,
            created_by: UserId::from_uuid(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}
