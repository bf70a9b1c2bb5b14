#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod animator;
pub mod client;
pub mod config;
pub mod connection;
pub mod entity;
pub mod location_store;
pub mod logs;
pub mod marker;
pub mod renderer;
pub mod router;
pub mod snapshot;
