// Library root for the chore ledger service

pub mod core;
pub mod store;
pub mod auth;
pub mod service;
pub mod api;
pub mod config;
