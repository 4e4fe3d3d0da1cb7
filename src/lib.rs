//! Rategate - Sliding-Window Admission Control
//!
//! This crate implements an in-process rate limiter for the marketplace HTTP
//! API. Requests are counted per `namespace:identity` key over a rolling
//! window, named policies (`api`, `auth`, `order`, `search`) share one store,
//! and a background sweeper evicts keys that stopped sending traffic.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
