//! Handle database requests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::Result;
use crate::user::{LocalUser, UserRepository};

/// PostgreSQL backed [`UserRepository`].
#[derive(Clone)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find(&self, login: &str) -> Result<Option<LocalUser>> {
        let user = sqlx::query_as::<_, LocalUser>(
            r#"SELECT login, name, account_type, password FROM users WHERE login = $1"#,
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn insert(&self, user: &LocalUser) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"INSERT INTO users (login, name, account_type, password)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (login) DO NOTHING"#,
        )
        .bind(&user.login)
        .bind(&user.name)
        .bind(user.account_type)
        .bind(&user.password)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }

    async fn has_role(&self, login: &str, role: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i32>(
            r#"SELECT 1 FROM user_roles WHERE role = $1 AND login = $2"#,
        )
        .bind(role)
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }

    async fn assign_role(&self, login: &str, role: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"INSERT INTO user_roles (role, login) VALUES ($1, $2)
                ON CONFLICT (role, login) DO NOTHING"#,
        )
        .bind(role)
        .bind(login)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() == 1)
    }
}
