//! Domain managers for server state.
//!
//! Each manager owns one domain: the chat channel registry and the guild
//! directory built on top of it.

pub mod channel;
pub mod guild;
