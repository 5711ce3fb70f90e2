pub mod api;
pub mod config;
pub mod constants;
pub mod context;
pub mod database;
pub mod error;
pub mod i18n;
pub mod models;
pub mod plugin;
pub mod stores;
pub mod validation;
pub mod writer;

pub use api::{AppState, routes};
pub use config::Config;
pub use context::RequestContext;
pub use database::Database;
pub use error::StageError;
pub use writer::StageConfigWriter;
