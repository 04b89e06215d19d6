pub mod config;
pub mod install;
pub mod run;

mod resolve;
