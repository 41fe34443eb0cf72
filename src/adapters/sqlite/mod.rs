//! SQLite adapter: connection pooling and migrations for the durable
//! queue broker (C6). The sprint state itself is never stored here —
//! see `services::state_store` for the directory-per-sprint file layout.

pub mod connection;
pub mod migrations;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
