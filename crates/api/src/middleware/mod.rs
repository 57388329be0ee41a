//! Request extractors shared by the routes.

mod actor;
mod extract;

pub use actor::{ACTOR_HEADER, Actor};
pub use extract::{ApiJson, ApiQuery};
