//! Slash command registration and handlers

pub mod verify;
pub mod voice;
