pub mod cli;
pub mod config;
pub mod nailang;
pub mod xcomp;
