pub mod job;
pub mod params;
