#![doc = include_str!("../README.md")]

pub mod config;
pub mod echo;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod telemetry;
