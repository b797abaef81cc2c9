//! API route modules.

pub mod meetings;
pub mod notifications;
pub mod triggers;
