pub mod application;
pub mod archive;
pub mod cleanup;
pub mod collector;
pub mod commands;
pub mod package;
pub mod retry;
pub mod runtime;
pub mod transport;
