pub mod auth;
pub mod bucket;
pub mod client;
pub mod events;
pub mod models;

pub use client::ApiClient;
