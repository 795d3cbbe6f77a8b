pub mod error;
pub mod paginator;
pub mod provider;
pub mod upbit;
