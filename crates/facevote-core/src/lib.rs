pub mod audit;
pub mod capture;
pub mod cohort;
pub mod db;
pub mod errors;
pub mod faces;
pub mod ledger;
pub mod registry;
pub mod response;
pub mod service;
pub mod trainer;

pub use cohort::{Cohort, CohortSettings};
pub use errors::{AppError, AppResult, ErrorKind};
pub use service::{CastVoteRequest, VotingService};
