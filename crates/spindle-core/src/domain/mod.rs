//! Domain model: identifiers, the persisted job record, and its status
//! machine.

pub mod ids;
pub mod record;
pub mod status;

pub use ids::{JobId, WorkerId};
pub use record::{ClaimToken, JobRecord};
pub use status::JobStatus;
