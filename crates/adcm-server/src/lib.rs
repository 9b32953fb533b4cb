//! ADCM Server - the `adcm` command line
//!
//! `adcm init | upgrade | load-bundle <path> | run-task <id>`

pub mod commands; // Subcommand implementations
pub mod model; // CLI arguments and layered configuration
pub mod startup; // Logging initialization
