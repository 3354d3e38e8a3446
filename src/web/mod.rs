mod error;
pub mod forms;
mod gate;
pub mod handlers;
mod helpers;
mod router;
mod types;

pub use error::{Ajax, HandlerErr};
pub use gate::{gate_decision, Gate};
pub use router::build_router;
pub use types::{AppState, Audience, Flash, FlashLevel, RequestContext};

/// Name of the cookie carrying the login session key.
pub const SESSION_COOKIE: &str = "sessionid";
