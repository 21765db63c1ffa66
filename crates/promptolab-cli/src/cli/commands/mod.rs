pub mod baseline;
pub mod dispatch;
pub mod eval;
pub mod init;
pub mod models;
pub(crate) mod provider_builder;
pub mod sets;

pub use dispatch::dispatch;
