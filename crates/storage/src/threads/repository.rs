//! Thread repositories for SQLite and Postgres.
//!
//! Both engines share one implementation, expanded per connection type by
//! `impl_thread_repository!`. Writes differ only in how the transaction is
//! opened: SQLite takes the write lock up front with `BEGIN IMMEDIATE`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use diesel::prelude::*;
use log::debug;

use threadmem_core::errors::{Error, Result};
use threadmem_core::threads::{Thread, ThreadFilter, ThreadRepositoryTrait};

use super::model::{MessageDB, ThreadDB};
use crate::db::{self, DbPool};
use crate::errors::{IntoCore, StorageError};
use crate::schema::{messages, threads};
use crate::utils::chunk_params;

/// SQLite implementation of [`ThreadRepositoryTrait`].
pub struct SqliteThreadRepository {
    pool: Arc<DbPool>,
}

impl SqliteThreadRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Prepares the database file, builds the pool and runs pending migrations.
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self> {
        db::init(db_path)?;
        let pool = db::create_pool(db_path, pool_size)?;
        db::run_migrations(&pool)?;
        Ok(Self::new(pool))
    }
}

/// Loads the messages of `thread_ids`, grouped by thread and in position order.
macro_rules! load_messages {
    ($conn:expr, $thread_ids:expr) => {{
        let mut grouped: HashMap<String, Vec<MessageDB>> = HashMap::new();
        for chunk in chunk_params($thread_ids) {
            let rows = messages::table
                .filter(messages::thread_id.eq_any(chunk))
                .order((messages::thread_id.asc(), messages::position.asc()))
                .load::<MessageDB>($conn)?;
            for row in rows {
                grouped.entry(row.thread_id.clone()).or_default().push(row);
            }
        }
        grouped
    }};
}

macro_rules! impl_thread_repository {
    ($repo:ty, $get_connection:path, $write_transaction:ident) => {
        impl ThreadRepositoryTrait for $repo {
            fn save(&self, thread: &Thread) -> Result<()> {
                let thread_row = ThreadDB::from_domain(thread)?;
                let message_rows = thread
                    .all_messages()
                    .iter()
                    .enumerate()
                    .map(|(position, message)| MessageDB::from_domain(message, position))
                    .collect::<Result<Vec<_>>>()?;
                let keep: HashSet<&str> = message_rows.iter().map(|m| m.id.as_str()).collect();

                let mut conn = $get_connection(&self.pool)?;
                conn.$write_transaction::<_, StorageError, _>(|conn| {
                    diesel::insert_into(threads::table)
                        .values(&thread_row)
                        .on_conflict(threads::id)
                        .do_update()
                        .set(&thread_row)
                        .execute(conn)?;

                    let stale: Vec<String> = messages::table
                        .filter(messages::thread_id.eq(&thread_row.id))
                        .select(messages::id)
                        .load::<String>(conn)?
                        .into_iter()
                        .filter(|id| !keep.contains(id.as_str()))
                        .collect();
                    for chunk in chunk_params(&stale) {
                        diesel::delete(messages::table.filter(messages::id.eq_any(chunk)))
                            .execute(conn)?;
                    }

                    for row in &message_rows {
                        diesel::insert_into(messages::table)
                            .values(row)
                            .on_conflict(messages::id)
                            .do_update()
                            .set(row)
                            .execute(conn)?;
                    }
                    Ok(())
                })
                .into_core()?;

                debug!(
                    "Saved thread {} ({} messages, version {})",
                    thread.id(),
                    thread.all_messages().len(),
                    thread.version()
                );
                Ok(())
            }

            fn load(&self, thread_id: &str) -> Result<Thread> {
                let mut conn = $get_connection(&self.pool)?;
                let (row, message_rows) = conn
                    .transaction::<_, StorageError, _>(|conn| {
                        let Some(row) = threads::table
                            .find(thread_id)
                            .first::<ThreadDB>(conn)
                            .optional()?
                        else {
                            return Ok(None);
                        };
                        let message_rows = messages::table
                            .filter(messages::thread_id.eq(thread_id))
                            .order(messages::position.asc())
                            .load::<MessageDB>(conn)?;
                        Ok(Some((row, message_rows)))
                    })
                    .into_core()?
                    .ok_or_else(|| Error::not_found("thread", thread_id))?;

                row.into_domain(message_rows)
            }

            fn find(&self, filter: &ThreadFilter) -> Result<Vec<Thread>> {
                let mut conn = $get_connection(&self.pool)?;
                let (rows, mut grouped) = conn
                    .transaction::<_, StorageError, _>(|conn| {
                        let mut query = threads::table.into_boxed();
                        if let Some(id) = &filter.id {
                            query = query.filter(threads::id.eq(id.clone()));
                        }
                        if let Some(owner_id) = &filter.owner_id {
                            query = query.filter(threads::owner_id.eq(owner_id.clone()));
                        }
                        if let Some(public) = filter.public {
                            query = query.filter(threads::public.eq(public));
                        }
                        if let Some(name) = &filter.name {
                            query = query.filter(threads::name.eq(name.clone()));
                        }
                        let rows = query
                            .order((threads::created.asc(), threads::id.asc()))
                            .load::<ThreadDB>(conn)?;

                        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
                        let grouped = load_messages!(conn, &ids);
                        Ok((rows, grouped))
                    })
                    .into_core()?;

                rows.into_iter()
                    .map(|row| {
                        let message_rows = grouped.remove(&row.id).unwrap_or_default();
                        row.into_domain(message_rows)
                    })
                    .collect()
            }

            fn delete(&self, thread_id: &str) -> Result<()> {
                let mut conn = $get_connection(&self.pool)?;
                let removed = conn
                    .$write_transaction::<_, StorageError, _>(|conn| {
                        diesel::delete(messages::table.filter(messages::thread_id.eq(thread_id)))
                            .execute(conn)?;
                        Ok(diesel::delete(threads::table.find(thread_id)).execute(conn)?)
                    })
                    .into_core()?;

                if removed == 0 {
                    return Err(Error::not_found("thread", thread_id));
                }
                debug!("Deleted thread {}", thread_id);
                Ok(())
            }
        }
    };
}
impl_thread_repository!(SqliteThreadRepository, db::get_connection, immediate_transaction);

#[cfg(feature = "postgres")]
pub use self::postgres::PgThreadRepository;

#[cfg(feature = "postgres")]
mod postgres {
    use super::*;
    use crate::db::postgres::{self as pg, PgPool};

    /// Postgres implementation of [`ThreadRepositoryTrait`].
    pub struct PgThreadRepository {
        pub(super) pool: Arc<PgPool>,
    }

    impl PgThreadRepository {
        pub fn new(pool: Arc<PgPool>) -> Self {
            Self { pool }
        }

        pub fn open(database_url: &str, pool_size: u32) -> Result<Self> {
            let pool = pg::create_pool(database_url, pool_size)?;
            pg::run_migrations(&pool)?;
            Ok(Self::new(pool))
        }
    }

    impl_thread_repository!(PgThreadRepository, pg::get_connection, transaction);
}
