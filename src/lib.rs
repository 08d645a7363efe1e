//! netprobed: a distributed network-performance probe daemon.
//!
//! One instance runs per cluster member. It measures pairwise HTTP latency
//! between members on a periodic schedule, drives controlled TCP/UDP traffic
//! flows toward named peers, and exposes a small JSON control plane to
//! start/stop/inspect these activities.

pub mod agent;
pub mod config;
pub mod control;
pub mod export;
pub mod probe;
pub mod receiver;
pub mod registry;
pub mod sink;
pub mod traffic;
