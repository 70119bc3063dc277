pub mod conversations;
pub mod database;
pub mod documents;
pub mod error;
pub mod messages;
pub mod patients;
pub mod ports;
pub mod row_helpers;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use ports::{ConversationStore, PatientSource, SqliteStore};
