//! Direct-messaging client core for a Supabase backend.
//!
//! Everything here is UI-independent; the GTK front-end lives behind the
//! `gui` feature in the binary.

pub mod api;
pub mod app;
pub mod chat;
pub mod error;
pub mod realtime;
pub mod storage;
pub mod utils;

pub use error::{Error, Result};
