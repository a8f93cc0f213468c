//! Email template repository

use async_trait::async_trait;
use sqlx::PgPool;

use crate::core::db::models::EmailTemplate;
use crate::core::db::store::{EmailTemplateStore, StoreError};

/// Email templates stored in PostgreSQL
#[derive(Clone)]
pub struct EmailTemplateRepository {
    pool: PgPool,
}

impl EmailTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailTemplateStore for EmailTemplateRepository {
    async fn get_by_name(&self, name: &str) -> Result<Option<EmailTemplate>, StoreError> {
        let template = sqlx::query_as::<_, EmailTemplate>(
            r#"
            SELECT id, name, subject, html_body
            FROM email_templates
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }
}
