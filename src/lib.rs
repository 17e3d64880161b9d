//! # Batch Relayer
//!
//! Library for the implementation of the batch payout relayer engine.

pub mod cli;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod funding;
pub mod keystore;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod nonce;
pub mod queue;
pub mod storage;
pub mod transport;
pub mod types;
