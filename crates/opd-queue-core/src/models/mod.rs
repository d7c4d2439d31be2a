//! Domain models for the token queue.

mod token;
mod session;
mod leave;

pub use token::*;
pub use session::*;
pub use leave::*;
