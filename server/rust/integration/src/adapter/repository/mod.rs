pub mod account_in_memory;
pub mod account_postgres;
pub mod mapping_in_memory;
pub mod mapping_postgres;
pub mod mapping_run_in_memory;
pub mod mapping_run_postgres;
pub mod profile_in_memory;
pub mod profile_postgres;
pub mod scraping_job_in_memory;
pub mod scraping_job_postgres;
pub mod sync_operation_in_memory;
pub mod sync_operation_postgres;

pub use account_in_memory::InMemoryAccountRepository;
pub use account_postgres::AccountPostgresRepository;
pub use mapping_in_memory::InMemoryMappingRepository;
pub use mapping_postgres::MappingPostgresRepository;
pub use mapping_run_in_memory::InMemoryMappingRunRepository;
pub use mapping_run_postgres::MappingRunPostgresRepository;
pub use profile_in_memory::InMemoryProfileRepository;
pub use profile_postgres::ProfilePostgresRepository;
pub use scraping_job_in_memory::InMemoryScrapingJobRepository;
pub use scraping_job_postgres::ScrapingJobPostgresRepository;
pub use sync_operation_in_memory::InMemorySyncOperationRepository;
pub use sync_operation_postgres::SyncOperationPostgresRepository;
