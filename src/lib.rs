//! Local packet capture and flow telemetry.
//!
//! Frames flow from a capture source through a lock-free exchange buffer
//! into the windowed aggregator, which emits one telemetry frame per window
//! to every WebSocket subscriber.

pub mod agent;
pub mod aggregator;
pub mod capture;
pub mod config;
pub mod exchange;
pub mod export;
pub mod flow;
pub mod lifecycle;
pub mod publish;
