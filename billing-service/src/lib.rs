//! Subscription billing and usage metering for multi-workspace tenants.
//!
//! The crate keeps subscription state consistent with the payment
//! processor's asynchronous webhook stream, meters usage against
//! plan-defined limits, and fans administrative bulk operations out across
//! workspaces with per-target outcome tracking.

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
