pub mod download;
pub mod job;
