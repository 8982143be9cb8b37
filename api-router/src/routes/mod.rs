pub mod download;
pub mod probes;
pub mod status;
pub mod submit;
