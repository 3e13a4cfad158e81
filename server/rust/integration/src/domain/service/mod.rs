pub mod profile_diff_service;

pub use profile_diff_service::{ProfileDiff, ProfileDiffService};
