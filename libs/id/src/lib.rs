//! Typed identifiers for hopchain.
//!
//! Every identifier renders as `{prefix}_{ulid}`:
//!
//! - `prof_01HV4Z2WQXKJNM8GPQY6VBKC3D`: a proxy profile
//! - `run_01HV4Z3MXNKPQR9HSTZ7WCLD4E`: one orchestration run
//!
//! A ULID is time ordered with 80 random bits, so a fresh `RunId` can name
//! scratch files without colliding under rapid restart.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::{ProfileId, RunId};
