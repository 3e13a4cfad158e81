pub mod account_guard;
pub mod clock;
pub mod config;
pub mod connector;
pub mod credential_vault;
pub mod database;
pub mod export_writer;
pub mod gateway_connector;
pub mod mapping_dispatcher;
pub mod rate_limiter;
