pub mod common;
mod listing_tests;
mod run_tests;
