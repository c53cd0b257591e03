// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for the removable partition monitor
//!
//! These models are shared by the whole stack:
//!
//! - **storage-udisks**: mutates `Partition` records while reconciling UDisks2
//!   block devices and jobs, and reports failures as `OperationErrorKind`
//! - **storage-monitor**: prints them for the command line and serializes them
//!   as JSON lines

pub mod common;
pub mod error_kind;
pub mod partition;

pub use common::bytes_to_pretty;
pub use error_kind::OperationErrorKind;
pub use partition::{ActiveState, Partition, PartitionStatus};
