pub mod aggregation;
pub mod backfill;
pub mod fetcher;
#[cfg(test)]
pub mod mock;
pub mod netatmo;
pub mod provider;
pub mod reports;
pub mod scheduler;
pub mod stations;
pub mod token;
