//! PostgreSQL sink over a Diesel r2d2 connection pool.

use serde::Deserialize;

#[cfg(feature = "postgres")]
pub use self::postgres::{Database, DatabaseSink, Pool, PooledConnection};

/// Pool sizing for the `database:` block of the run configuration.
///
/// The bulk load holds one connection per table batch and reconciliation
/// borrows one per deleted record, so `max_connections` should cover
/// `workers` plus one.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 15,
            min_idle: 5,
            connection_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[cfg(feature = "postgres")]
mod postgres {
    use std::ops::RangeInclusive;
    use std::sync::Arc;
    use std::time::Duration;

    use diesel::pg::PgConnection;
    use diesel::prelude::*;
    use diesel::r2d2::{self, ConnectionManager};
    use uuid::Uuid;

    use super::DatabaseConfig;
    use crate::error::SinkError;
    use crate::graph::{AttributeRow, NodeRow, StorageObjectRow, NODE_KIND};
    use crate::sink::models::{
        NewAttribute, NewObject, NewParentedNode, NewParentlessNode, PriorAttributeRecord,
        PriorNodeRecord, PriorObjectRecord,
    };
    use crate::sink::schema::{objects, search_attributes};
    use crate::sink::{MigrationSink, PriorAttribute, PriorNode, PriorObject};

    type Manager = ConnectionManager<PgConnection>;
    pub type Pool = r2d2::Pool<Manager>;
    pub type PooledConnection = r2d2::PooledConnection<Manager>;

    /// Registry database handle; clones share one pool.
    #[derive(Clone)]
    pub struct Database {
        pool: Arc<Pool>,
    }

    impl Database {
        /// ```ignore
        /// let db = Database::connect("postgres://registry@localhost/registry", &DatabaseConfig::default())?;
        /// ```
        pub fn connect(database_url: &str, config: &DatabaseConfig) -> Result<Self, SinkError> {
            let pool = r2d2::Pool::builder()
                .max_size(config.max_connections)
                .min_idle(Some(config.min_idle))
                .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
                .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
                .max_lifetime(Some(Duration::from_secs(config.max_lifetime_secs)))
                .build(Manager::new(database_url))?;
            Ok(Self { pool: Arc::new(pool) })
        }

        pub fn connection(&self) -> Result<PooledConnection, SinkError> {
            Ok(self.pool.get()?)
        }

        /// Round-trip a trivial query so a bad URL fails before any deletes.
        pub fn ping(&self) -> Result<(), SinkError> {
            diesel::sql_query("SELECT 1").execute(&mut self.connection()?)?;
            Ok(())
        }
    }

    /// Writes `"Objects"` and `"SearchAttributes"`.
    pub struct DatabaseSink {
        db: Database,
    }

    impl DatabaseSink {
        pub fn new(db: Database) -> Self {
            Self { db }
        }
    }

    fn parse_id(raw: &str, column: &str) -> Option<Uuid> {
        match Uuid::parse_str(raw) {
            Ok(id) => Some(id),
            Err(_) => {
                tracing::warn!("Skipping prior row with non-UUID {} '{}'", column, raw);
                None
            }
        }
    }

    impl MigrationSink for DatabaseSink {
        fn prior_attributes(
            &self,
            creator_prefix: &str,
            names: &[String],
        ) -> Result<Vec<PriorAttribute>, SinkError> {
            use search_attributes::dsl;

            let mut conn = self.db.connection()?;
            let rows = dsl::search_attributes
                .filter(dsl::created_by.like(format!("{}%", creator_prefix)))
                .filter(dsl::name.eq_any(names))
                .select((
                    dsl::id,
                    dsl::parent_number,
                    dsl::parent_attr_id,
                    dsl::name,
                    dsl::text_value,
                    dsl::int_value,
                ))
                .load::<PriorAttributeRecord>(&mut conn)?;

            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(PriorAttribute {
                        id: parse_id(&r.id, "ID")?,
                        object_id: parse_id(&r.parent_number, "ParentNumber")?,
                        node_id: parse_id(r.parent_attr_id.as_deref()?, "ParentAttrId")?,
                        name: r.name,
                        text_value: r.text_value,
                        int_value: r.int_value,
                    })
                })
                .collect())
        }

        fn prior_nodes(&self, names: &[String]) -> Result<Vec<PriorNode>, SinkError> {
            use search_attributes::dsl;

            let mut conn = self.db.connection()?;
            let rows = dsl::search_attributes
                .filter(dsl::kind.eq(NODE_KIND))
                .filter(dsl::name.eq_any(names))
                .select((dsl::id, dsl::parent_number, dsl::name))
                .load::<PriorNodeRecord>(&mut conn)?;

            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(PriorNode {
                        id: parse_id(&r.id, "ID")?,
                        object_id: parse_id(&r.parent_number, "ParentNumber")?,
                        name: r.name,
                    })
                })
                .collect())
        }

        fn prior_objects(&self, class_types: RangeInclusive<i32>) -> Result<Vec<PriorObject>, SinkError> {
            use objects::dsl;

            let mut conn = self.db.connection()?;
            let rows = dsl::objects
                .filter(
                    dsl::class_type
                        .between(class_types.start().to_string(), class_types.end().to_string()),
                )
                .select((dsl::number, dsl::parent_number, dsl::class_type))
                .load::<PriorObjectRecord>(&mut conn)?;

            Ok(rows
                .into_iter()
                .filter_map(|r| {
                    Some(PriorObject {
                        number: parse_id(&r.number, "Number")?,
                        parent_number: r.parent_number,
                        class_type: r.class_type,
                    })
                })
                .collect())
        }

        fn delete_object(&self, object_id: Uuid) -> Result<usize, SinkError> {
            let mut conn = self.db.connection()?;
            let key = object_id.to_string();
            let removed = conn.transaction::<_, diesel::result::Error, _>(|conn| {
                let attrs = diesel::delete(
                    search_attributes::table.filter(search_attributes::parent_number.eq(&key)),
                )
                .execute(conn)?;
                let objs = diesel::delete(objects::table.filter(objects::number.eq(&key)))
                    .execute(conn)?;
                Ok(attrs + objs)
            })?;
            tracing::info!("Deleted prior object {} ({} rows)", object_id, removed);
            Ok(removed)
        }

        fn insert_objects(&self, rows: &[StorageObjectRow]) -> Result<usize, SinkError> {
            let mut conn = self.db.connection()?;
            let values: Vec<NewObject> = rows.iter().map(NewObject::from).collect();
            Ok(diesel::insert_into(objects::table)
                .values(&values)
                .execute(&mut conn)?)
        }

        fn insert_parentless_nodes(&self, rows: &[NodeRow]) -> Result<usize, SinkError> {
            let mut conn = self.db.connection()?;
            let values: Vec<NewParentlessNode> = rows.iter().map(NewParentlessNode::from).collect();
            Ok(diesel::insert_into(search_attributes::table)
                .values(&values)
                .execute(&mut conn)?)
        }

        fn insert_parented_nodes(&self, rows: &[NodeRow]) -> Result<usize, SinkError> {
            let mut conn = self.db.connection()?;
            let values: Vec<NewParentedNode> = rows.iter().map(NewParentedNode::from).collect();
            Ok(diesel::insert_into(search_attributes::table)
                .values(&values)
                .execute(&mut conn)?)
        }

        fn insert_attributes(&self, rows: &[AttributeRow]) -> Result<usize, SinkError> {
            let mut conn = self.db.connection()?;
            let values: Vec<NewAttribute> = rows.iter().map(NewAttribute::from).collect();
            Ok(diesel::insert_into(search_attributes::table)
                .values(&values)
                .execute(&mut conn)?)
        }
    }
}
