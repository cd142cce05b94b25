pub mod admin;
pub mod data;
pub mod public;
pub mod reports;
pub mod session;
