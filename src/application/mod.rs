pub mod config;
pub mod startup;
pub mod state;
pub mod supervisor;
