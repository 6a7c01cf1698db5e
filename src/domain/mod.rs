//! Domain types shared by the session controller, transports and front ends.

pub mod error;
pub mod models;
pub mod position;
pub mod settings;
