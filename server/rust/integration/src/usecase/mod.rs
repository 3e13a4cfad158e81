pub mod account_registry;
pub mod connection_validator;
pub mod linkedin_service;
pub mod mapping_run_engine;
pub mod mapping_service;
pub mod scraping_job_scheduler;
pub mod sync_reconciler;

pub use account_registry::AccountRegistry;
pub use connection_validator::ConnectionValidator;
pub use linkedin_service::LinkedInService;
pub use mapping_run_engine::MappingRunEngine;
pub use mapping_service::MappingService;
pub use scraping_job_scheduler::ScrapingJobScheduler;
pub use sync_reconciler::SyncReconciler;
