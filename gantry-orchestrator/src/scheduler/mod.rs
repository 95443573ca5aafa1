//! Scheduler Module
//!
//! Background workers driving periodic control-plane activity.

pub mod worker;

pub use worker::ScanWorker;
