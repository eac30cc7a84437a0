pub mod conversations;
pub mod database;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod participants;
pub mod presence;
mod row_helpers;
pub mod schema;
pub mod typing;

pub use database::Database;
pub use error::StoreError;
pub use gateway::{SqliteGateway, StoreGateway};
pub use messages::MessageRow;
