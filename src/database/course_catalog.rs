//! Course catalog read model
//!
//! The catalog itself belongs to the content domain; the payment core only
//! reads the columns it needs to price a checkout. Sale price wins when
//! one is set and lower than the list price.

use crate::error::{AppError, AppResult, DomainError};
use crate::payments::{CourseCatalog, CourseOffer};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    price: i64,
    sale_price: Option<i64>,
}

pub struct CourseCatalogRepository {
    pool: PgPool,
}

impl CourseCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourseCatalog for CourseCatalogRepository {
    async fn offer(&self, course_id: Uuid) -> AppResult<CourseOffer> {
        let row: Option<CourseRow> = sqlx::query_as(
            r#"
            SELECT id, title, price, sale_price
            FROM courses
            WHERE id = $1 AND is_published = true
            "#,
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::database::error::DatabaseError::from_sqlx)?;

        let row = row.ok_or(AppError::domain(DomainError::CourseNotFound {
            id: course_id,
        }))?;

        let price = match row.sale_price {
            Some(sale) if sale < row.price => sale,
            _ => row.price,
        };

        Ok(CourseOffer {
            course_id: row.id,
            title: row.title,
            price,
        })
    }
}
