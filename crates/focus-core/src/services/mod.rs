//! Service layer over the database.

mod database;

pub use database::DatabaseService;
