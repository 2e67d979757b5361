//! `photohub-core`: shared building blocks for the job engine and the
//! project workflow.
//!
//! This crate holds **pure** primitives only (ids, errors, aggregate traits).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, ProjectId};
