pub mod conversations;
pub mod profile;
pub mod service;
pub mod session;
pub mod thread;
pub mod time;
pub mod typing;
pub mod username;

pub use service::{ChatEvent, ChatService};
pub use session::{Phase, SessionState};
