pub mod delivery;
pub mod intake;
pub mod jobs;
