//! # Custom resource definition module
//!
//! This module provide the custom resources owned by other operators that the
//! command line interface reads and updates with typed structures.

pub mod backup;
