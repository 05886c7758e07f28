//! PostgreSQL-backed storage. Requires `--features postgres` and
//! `TEST_ADMIN_DATABASE_URL`.

mod store;
mod support;
