//! Request handlers.

pub mod health;
pub mod index;
pub mod proxy;
pub mod status;
