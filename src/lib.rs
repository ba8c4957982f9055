//! Ringlimit - Sliding-Window Rate Limiting
//!
//! This crate decides whether an event should be allowed or throttled by
//! keeping the timestamps of the last N admitted events in a fixed-size ring.
//! A [`WindowCounter`](ratelimit::WindowCounter) limits a single identity;
//! a [`KeyedLimiter`](ratelimit::KeyedLimiter) keeps one counter per key and
//! sweeps away keys that have gone idle.
//!
//! All state is in memory and local to the process.

pub mod config;
pub mod error;
pub mod ratelimit;
