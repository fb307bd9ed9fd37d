pub mod adapter;
pub mod schema;

pub use adapter::{Adapter, FindManyQuery, Operator, SortBy, SortDirection, WhereClause};
pub use schema::{
    AUDIT_LOG_TABLE, CONFIGURATIONS_TABLE, SESSIONS_TABLE, UNIQUE_CONSTRAINTS,
    USER_IDENTITIES_TABLE,
};
