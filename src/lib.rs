pub mod backtesting;
pub mod bot;
pub mod config;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod models;
pub mod parser;
pub mod sizing;
#[cfg(test)]
pub mod test_helpers;
