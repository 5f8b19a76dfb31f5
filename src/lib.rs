pub mod archive;
pub mod config;
pub mod dumper;
pub mod fetch;
pub mod humanize;
pub mod loader;
pub mod manifest;
pub mod observability;
pub mod stash;
pub mod staging;
pub mod storage;
