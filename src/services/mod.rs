pub mod candidates;
pub mod cold_start;
pub mod fusion;
pub mod interactions;
pub mod providers;
pub mod recommendations;
pub mod stage;

pub use recommendations::Recommender;
