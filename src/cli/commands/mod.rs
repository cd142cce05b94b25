pub mod permissions;
pub mod policy;
pub mod token;
