//! Tuple Store persistence, with the AND-combined dynamic filter built on
//! `sea-query` instead of hand string concatenation so additional filters
//! (`relation_in`, tenant) stay dialect-safe.

use chrono::{DateTime, Utc};
use sea_query::{Cond, Expr, Iden, PostgresQueryBuilder, Query};
use sea_query_binder::SqlxBinder;
use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use nexus_models::tuple::SubjectType;
use nexus_models::RelationTuple;

use crate::error::{Result, StorageError};

#[derive(Iden)]
enum Tuples {
    Table,
    TupleId,
    SubjectType,
    SubjectId,
    SubjectRelation,
    Relation,
    ObjectType,
    ObjectId,
    CreatedAt,
    ExpiresAt,
    Conditions,
    TenantId,
    SubjectTenantId,
    ObjectTenantId,
}

#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    pub subject_type: Option<SubjectType>,
    pub subject_id: Option<String>,
    pub relation: Option<String>,
    pub relation_in: Option<Vec<String>>,
    pub object_type: Option<String>,
    pub object_id: Option<String>,
    pub tenant_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone)]
pub struct WriteTupleInput {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub relation: String,
    pub object_type: String,
    pub object_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub tenant_id: Option<Uuid>,
    pub subject_tenant_id: Option<Uuid>,
    pub object_tenant_id: Option<Uuid>,
}

#[derive(FromRow)]
struct TupleRow {
    tuple_id: Uuid,
    subject_type: String,
    subject_id: String,
    subject_relation: Option<String>,
    relation: String,
    object_type: String,
    object_id: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    conditions: Option<serde_json::Value>,
    tenant_id: Option<Uuid>,
    subject_tenant_id: Option<Uuid>,
    object_tenant_id: Option<Uuid>,
}

impl TryFrom<TupleRow> for RelationTuple {
    type Error = StorageError;

    fn try_from(row: TupleRow) -> Result<Self> {
        let subject_type = row
            .subject_type
            .parse()
            .map_err(StorageError::NotFound)?;
        Ok(RelationTuple {
            tuple_id: row.tuple_id,
            subject_type,
            subject_id: row.subject_id,
            subject_relation: row.subject_relation,
            relation: row.relation,
            object_type: row.object_type,
            object_id: row.object_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
            conditions: row.conditions,
            tenant_id: row.tenant_id,
            subject_tenant_id: row.subject_tenant_id,
            object_tenant_id: row.object_tenant_id,
        })
    }
}

/// A tuple's tenant id must agree with any subject/object tenant id
/// carried alongside it.
fn validate_cross_tenant(input: &WriteTupleInput) -> Result<()> {
    if let Some(tenant) = input.tenant_id {
        if let Some(subject_tenant) = input.subject_tenant_id {
            if subject_tenant != tenant {
                return Err(StorageError::CrossTenant(
                    "subject_tenant_id does not match tenant_id".into(),
                ));
            }
        }
        if let Some(object_tenant) = input.object_tenant_id {
            if object_tenant != tenant {
                return Err(StorageError::CrossTenant(
                    "object_tenant_id does not match tenant_id".into(),
                ));
            }
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct TupleRepository {
    pool: PgPool,
}

impl TupleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// `write`: validates tenant invariants, inserts the tuple and its
    /// changelog row. The revision bump happens one layer up in
    /// `nexus-revision` so both writes commit atomically within the same
    /// transaction as the caller's revision bump.
    pub async fn write(&self, input: WriteTupleInput) -> Result<RelationTuple> {
        validate_cross_tenant(&input)?;

        let mut tx = self.pool.begin().await?;
        let tuple_id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO tuples
                (tuple_id, subject_type, subject_id, subject_relation, relation,
                 object_type, object_id, created_at, expires_at, conditions,
                 tenant_id, subject_tenant_id, object_tenant_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(tuple_id)
        .bind(input.subject_type.to_string())
        .bind(&input.subject_id)
        .bind(&input.subject_relation)
        .bind(&input.relation)
        .bind(&input.object_type)
        .bind(&input.object_id)
        .bind(now)
        .bind(input.expires_at)
        .bind(&input.conditions)
        .bind(input.tenant_id)
        .bind(input.subject_tenant_id)
        .bind(input.object_tenant_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO changelog
                (change_id, change_type, tuple_id, subject_type, subject_id, relation,
                 object_type, object_id, created_at)
            VALUES ($1, 'insert', $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tuple_id)
        .bind(input.subject_type.to_string())
        .bind(&input.subject_id)
        .bind(&input.relation)
        .bind(&input.object_type)
        .bind(&input.object_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            %tuple_id,
            relation = %input.relation,
            object = format!("{}:{}", input.object_type, input.object_id),
            "wrote relation tuple"
        );

        Ok(RelationTuple {
            tuple_id,
            subject_type: input.subject_type,
            subject_id: input.subject_id,
            subject_relation: input.subject_relation,
            relation: input.relation,
            object_type: input.object_type,
            object_id: input.object_id,
            created_at: now,
            expires_at: input.expires_at,
            conditions: input.conditions,
            tenant_id: input.tenant_id,
            subject_tenant_id: input.subject_tenant_id,
            object_tenant_id: input.object_tenant_id,
        })
    }

    /// Fetches a tuple by id regardless of liveness, so a caller driving
    /// invalidation off a `delete` can still see the subject/object pair
    /// after the row itself is gone.
    pub async fn get(&self, tuple_id: Uuid) -> Result<Option<RelationTuple>> {
        let row: Option<TupleRow> = sqlx::query_as("SELECT * FROM tuples WHERE tuple_id = $1")
            .bind(tuple_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(RelationTuple::try_from).transpose()
    }

    /// `delete`: returns `false` if not found or already expired rather
    /// than erroring (`NOT_FOUND` is not a hard failure here).
    pub async fn delete(&self, tuple_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<TupleRow> = sqlx::query_as(
            r#"SELECT * FROM tuples WHERE tuple_id = $1 AND (expires_at IS NULL OR expires_at >= now())"#,
        )
        .bind(tuple_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(existing) = existing else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM tuples WHERE tuple_id = $1")
            .bind(tuple_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO changelog
                (change_id, change_type, tuple_id, subject_type, subject_id, relation,
                 object_type, object_id, created_at)
            VALUES ($1, 'delete', $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tuple_id)
        .bind(&existing.subject_type)
        .bind(&existing.subject_id)
        .bind(&existing.relation)
        .bind(&existing.object_type)
        .bind(&existing.object_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(%tuple_id, "deleted relation tuple");
        Ok(true)
    }

    /// `list`: all filters AND-combined, expired tuples excluded.
    pub async fn list(&self, filter: TupleFilter) -> Result<Vec<RelationTuple>> {
        let mut cond = Cond::all()
            .add(
                Expr::col(Tuples::ExpiresAt)
                    .is_null()
                    .or(Expr::col(Tuples::ExpiresAt).gte(Expr::cust("now()"))),
            );

        if let Some(st) = filter.subject_type {
            cond = cond.add(Expr::col(Tuples::SubjectType).eq(st.to_string()));
        }
        if let Some(sid) = &filter.subject_id {
            cond = cond.add(Expr::col(Tuples::SubjectId).eq(sid.clone()));
        }
        if let Some(rel) = &filter.relation {
            cond = cond.add(Expr::col(Tuples::Relation).eq(rel.clone()));
        }
        if let Some(rels) = &filter.relation_in {
            cond = cond.add(Expr::col(Tuples::Relation).is_in(rels.clone()));
        }
        if let Some(ot) = &filter.object_type {
            cond = cond.add(Expr::col(Tuples::ObjectType).eq(ot.clone()));
        }
        if let Some(oid) = &filter.object_id {
            cond = cond.add(Expr::col(Tuples::ObjectId).eq(oid.clone()));
        }
        if let Some(tenant) = filter.tenant_id {
            cond = match tenant {
                Some(t) => cond.add(Expr::col(Tuples::TenantId).eq(t)),
                None => cond.add(Expr::col(Tuples::TenantId).is_null()),
            };
        }

        let (sql, values) = Query::select()
            .columns([
                Tuples::TupleId,
                Tuples::SubjectType,
                Tuples::SubjectId,
                Tuples::SubjectRelation,
                Tuples::Relation,
                Tuples::ObjectType,
                Tuples::ObjectId,
                Tuples::CreatedAt,
                Tuples::ExpiresAt,
                Tuples::Conditions,
                Tuples::TenantId,
                Tuples::SubjectTenantId,
                Tuples::ObjectTenantId,
            ])
            .from(Tuples::Table)
            .cond_where(cond)
            .order_by(Tuples::CreatedAt, sea_query::Order::Desc)
            .build_sqlx(PostgresQueryBuilder);

        let rows: Vec<TupleRow> = sqlx::query_as_with(&sql, values).fetch_all(&self.pool).await?;
        rows.into_iter().map(RelationTuple::try_from).collect()
    }

    /// `find_direct`: first non-expired tuple for the pair. ABAC
    /// evaluation against `context` happens in `nexus-graph`; this only does
    /// the existence lookup.
    pub async fn find_direct(
        &self,
        subject: &nexus_models::SubjectRef,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<RelationTuple>> {
        let row: Option<TupleRow> = sqlx::query_as(
            r#"
            SELECT * FROM tuples
            WHERE subject_type = $1 AND subject_id = $2 AND relation = $3
              AND object_type = $4 AND object_id = $5
              AND (expires_at IS NULL OR expires_at >= now())
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subject.subject_type.to_string())
        .bind(&subject.subject_id)
        .bind(relation)
        .bind(object_type)
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RelationTuple::try_from).transpose()
    }

    /// base case (b): the wildcard tuple `("*","*", relation, object)`.
    pub async fn find_wildcard(
        &self,
        relation: &str,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<RelationTuple>> {
        let row: Option<TupleRow> = sqlx::query_as(
            r#"
            SELECT * FROM tuples
            WHERE subject_id = '*' AND relation = $1
              AND object_type = $2 AND object_id = $3
              AND (expires_at IS NULL OR expires_at >= now())
            LIMIT 1
            "#,
        )
        .bind(relation)
        .bind(object_type)
        .bind(object_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RelationTuple::try_from).transpose()
    }

    /// `find_related_objects`: used by `tupleToUserset` to walk
    /// `tupleset` edges from `object`.
    pub async fn find_related_objects(
        &self,
        object_type: &str,
        object_id: &str,
        tupleset_relation: &str,
    ) -> Result<Vec<RelationTuple>> {
        let rows: Vec<TupleRow> = sqlx::query_as(
            r#"
            SELECT * FROM tuples
            WHERE object_type = $1 AND object_id = $2 AND relation = $3
              AND (expires_at IS NULL OR expires_at >= now())
            "#,
        )
        .bind(object_type)
        .bind(object_id)
        .bind(tupleset_relation)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RelationTuple::try_from).collect()
    }

    /// `find_subject_sets`: userset-as-subject tuples pointing at
    /// `object` with `relation`. Tenant filter pins `tenant_id IS NULL` when
    /// `tenant` is `None`, never matching "any tenant".
    pub async fn find_subject_sets(
        &self,
        relation: &str,
        object_type: &str,
        object_id: &str,
        tenant: Option<Uuid>,
    ) -> Result<Vec<RelationTuple>> {
        let rows: Vec<TupleRow> = match tenant {
            Some(tenant_id) => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM tuples
                    WHERE object_type = $1 AND object_id = $2 AND relation = $3
                      AND subject_relation IS NOT NULL
                      AND tenant_id = $4
                      AND (expires_at IS NULL OR expires_at >= now())
                    "#,
                )
                .bind(object_type)
                .bind(object_id)
                .bind(relation)
                .bind(tenant_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    r#"
                    SELECT * FROM tuples
                    WHERE object_type = $1 AND object_id = $2 AND relation = $3
                      AND subject_relation IS NOT NULL
                      AND tenant_id IS NULL
                      AND (expires_at IS NULL OR expires_at >= now())
                    "#,
                )
                .bind(object_type)
                .bind(object_id)
                .bind(relation)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(RelationTuple::try_from).collect()
    }

    /// `sweep_expired`: removes dead tuples, appends DELETE changelog
    /// rows, returns the count (caller drives invalidation per row).
    pub async fn sweep_expired(&self) -> Result<Vec<RelationTuple>> {
        let mut tx = self.pool.begin().await?;

        let expired: Vec<TupleRow> =
            sqlx::query_as(r#"SELECT * FROM tuples WHERE expires_at <= now()"#)
                .fetch_all(&mut *tx)
                .await?;

        for row in &expired {
            sqlx::query("DELETE FROM tuples WHERE tuple_id = $1")
                .bind(row.tuple_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query(
                r#"
                INSERT INTO changelog
                    (change_id, change_type, tuple_id, subject_type, subject_id, relation,
                     object_type, object_id, created_at)
                VALUES ($1, 'delete', $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(row.tuple_id)
            .bind(&row.subject_type)
            .bind(&row.subject_id)
            .bind(&row.relation)
            .bind(&row.object_type)
            .bind(&row.object_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "swept expired tuples");
        }

        expired.into_iter().map(RelationTuple::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_tenant_mismatch_is_rejected() {
        let input = WriteTupleInput {
            subject_type: SubjectType::User,
            subject_id: "alice".into(),
            subject_relation: None,
            relation: "viewer".into(),
            object_type: "document".into(),
            object_id: "doc1".into(),
            expires_at: None,
            conditions: None,
            tenant_id: Some(Uuid::new_v4()),
            subject_tenant_id: Some(Uuid::new_v4()),
            object_tenant_id: None,
        };
        assert!(validate_cross_tenant(&input).is_err());
    }

    #[test]
    fn matching_tenants_are_accepted() {
        let tenant = Uuid::new_v4();
        let input = WriteTupleInput {
            subject_type: SubjectType::User,
            subject_id: "alice".into(),
            subject_relation: None,
            relation: "viewer".into(),
            object_type: "document".into(),
            object_id: "doc1".into(),
            expires_at: None,
            conditions: None,
            tenant_id: Some(tenant),
            subject_tenant_id: Some(tenant),
            object_tenant_id: Some(tenant),
        };
        assert!(validate_cross_tenant(&input).is_ok());
    }
}
