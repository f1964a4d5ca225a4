//! Core module - configuration, errors, events and device state

pub mod config;
pub mod error;
pub mod events;
pub mod info;
pub mod settings;
pub mod state;
pub mod status;
