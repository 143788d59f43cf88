//! # Database module
//!
//! This module provide the operations the command line interface performs on
//! kubedb databases: pausing, resuming and restarting them, reading their
//! credentials, talking to them through their native client and preparing
//! their remote replicas.

pub mod credentials;
pub mod data;
pub mod pauser;
pub mod replica;
pub mod restarter;
pub mod resumer;
pub mod shell;
