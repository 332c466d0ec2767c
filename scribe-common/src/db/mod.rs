//! Database models, initialization and access

pub mod init;
pub mod models;
pub mod proxy;
pub mod work_items;

pub use init::{create_schema, init_database};
pub use models::*;
pub use proxy::DbProxy;
pub use work_items::WorkItemStore;
