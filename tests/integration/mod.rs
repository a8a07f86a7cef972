// Integration tests organized by module

#[path = "../common/mod.rs"]
mod common;

mod test_accounts;
mod test_api;
mod test_ledger;
mod test_postgres;
