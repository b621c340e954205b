#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod backends;
pub mod cli;
pub mod error;
pub mod eval;
pub mod suites;

mod render;
