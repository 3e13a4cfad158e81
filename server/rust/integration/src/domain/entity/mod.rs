pub mod account;
pub mod credentials;
pub mod field_mapping;
pub mod mapping;
pub mod mapping_run;
pub mod profile;
pub mod provider_config;
pub mod scraping_job;
pub mod sync_operation;
