//! Waypoint - Round-robin reverse proxy load balancer
//!
//! Core library for HTTP handling, backend selection and proxy lifecycle.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;
