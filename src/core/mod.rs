// Core domain: models and error types

pub mod errors;
pub mod models;
