use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::Error;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use ember_shared::ConsumedSecret;
use ulid::Ulid;

use crate::schema::secrets;

#[derive(Debug, Clone, Insertable, Queryable, Selectable)]
#[diesel(table_name = secrets)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Secret {
    id: String,
    payload: Option<String>,
    created_at: DateTime<Utc>,
}

impl Secret {
    pub fn new(payload: String) -> Self {
        Self {
            id: Ulid::new().to_string(),
            payload: Some(payload),
            created_at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub fn backdated(payload: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            ..Self::new(payload.to_string())
        }
    }

    pub fn get_id(&self) -> String {
        self.id.clone()
    }

    pub async fn insert(self, conn: &mut AsyncPgConnection) -> Result<usize, Error> {
        use crate::schema::secrets::dsl::secrets;

        diesel::insert_into(secrets)
            .values(self)
            .execute(conn)
            .await
    }

    /// Take the payload in one transaction. The row lock makes a concurrent
    /// consumer wait, then see the cleared payload and match nothing.
    pub async fn consume(
        secret_id: &str,
        conn: &mut AsyncPgConnection,
    ) -> Result<Option<ConsumedSecret>, Error> {
        use crate::schema::secrets::dsl::{id, payload, secrets};

        conn.transaction::<_, Error, _>(|conn| {
            async move {
                let row = secrets
                    .filter(id.eq(secret_id))
                    .filter(payload.is_not_null())
                    .select(Self::as_select())
                    .for_update()
                    .first(conn)
                    .await
                    .optional()?;

                let Some(row) = row else {
                    return Ok(None);
                };

                diesel::update(secrets.filter(id.eq(secret_id)))
                    .set(payload.eq(None::<String>))
                    .execute(conn)
                    .await?;

                Ok(row.payload.map(|p| ConsumedSecret {
                    payload: p,
                    created_at: row.created_at,
                }))
            }
            .scope_boxed()
        })
        .await
    }

    /// Clear payloads created before `cutoff` and drop tombstones past it.
    pub async fn clear_expired(
        cutoff: DateTime<Utc>,
        conn: &mut AsyncPgConnection,
    ) -> Result<usize, Error> {
        use crate::schema::secrets::dsl::{created_at, payload, secrets};

        diesel::delete(
            secrets
                .filter(payload.is_null())
                .filter(created_at.lt(cutoff)),
        )
        .execute(conn)
        .await?;

        diesel::update(
            secrets
                .filter(payload.is_not_null())
                .filter(created_at.lt(cutoff)),
        )
        .set(payload.eq(None::<String>))
        .execute(conn)
        .await
    }
}
