#![doc = include_str!("../README.md")]

pub mod auth;
pub mod channel;
pub mod config;
pub mod engine;
pub mod processors;
pub mod sink;
pub mod telemetry;
