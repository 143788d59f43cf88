//! # Services module
//!
//! This module provide services to interact with kubernetes, kubedb databases,
//! prometheus and helpers to do so.
pub mod cfg;
pub mod crd;
pub mod database;
pub mod describer;
pub mod editor;
pub mod http;
pub mod k8s;
pub mod printer;
pub mod prometheus;
