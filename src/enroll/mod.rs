//! The multi-step registration and verification pipeline.
//!
//! The server stays stateless between steps: a signed temp token
//! ([`token::StepTokenCodec`]) carries session identity, step, and version
//! across round trips, while the durable draft lives behind the
//! [`store::EnrollmentStore`] abstraction. The [`machine`] module fixes the
//! legal step order, [`codes`] governs one-time verification codes for the
//! email and phone channels, and [`service::EnrollmentService`] orchestrates
//! the whole flow up to the atomic, idempotent finalize.

pub mod codes;
pub mod config;
pub mod credentials;
pub mod machine;
pub mod models;
pub mod service;
pub mod store;
pub mod sweep;
pub mod token;

pub use config::EnrollConfig;
pub use models::{Channel, EnrollmentSession, FinalizeResult, Flow, Step};
pub use service::EnrollmentService;
