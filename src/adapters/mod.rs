//! Adapters: concrete bindings between this crate's services and the
//! outside world (the durable SQLite store, the combined REST +
//! observer HTTP surface).

pub mod http;
pub mod sqlite;
