//! Route modules for the tus server

pub mod health;
pub mod tus;

pub use tus::router;
