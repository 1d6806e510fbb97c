pub mod app;
pub mod capability;
pub mod config;
pub mod coordination;
pub mod shared;
