//! Backend access: the data service contract and its REST implementation.

pub mod client;
pub mod service;
pub mod types;

pub use client::RestClient;
pub use types::ResourceKind;
