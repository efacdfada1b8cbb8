//! Credential pair, session ownership, and single-flight refresh coordination.

pub mod credentials;
pub mod session;
pub mod stats;

pub use credentials::*;
pub use session::*;
pub use stats::*;
