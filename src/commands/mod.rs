pub mod config;
pub mod hold;
pub mod simulate;
