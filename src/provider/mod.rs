pub mod apis;
pub mod client;
pub mod dto;

pub use client::{HttpProvider, ProviderApi};
pub use dto::ProviderTable;
