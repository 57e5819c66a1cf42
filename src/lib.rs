//! VendBot: conversational workflow engine for a vending fleet.

pub mod api;
pub mod bot;
pub mod channels;
pub mod config;
pub mod error;
pub mod notify;
pub mod scenes;
pub mod store;
pub mod workflow;
