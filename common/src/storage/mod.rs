pub mod artifacts;
pub mod layout;
pub mod registry;
pub mod types;
