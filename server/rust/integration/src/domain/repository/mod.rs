pub mod account_repository;
pub mod mapping_repository;
pub mod mapping_run_repository;
pub mod profile_repository;
pub mod scraping_job_repository;
pub mod sync_operation_repository;

pub use account_repository::AccountRepository;
pub use mapping_repository::MappingRepository;
pub use mapping_run_repository::MappingRunRepository;
pub use profile_repository::ProfileRepository;
pub use scraping_job_repository::ScrapingJobRepository;
pub use sync_operation_repository::SyncOperationRepository;
