//! Routing for `stash://host/path?query` requests.
//!
//! A [`SchemeRouter`] answers every request with an [`http::Response`]:
//! resource bytes (located, migrated and transcoded as needed), one of the
//! embedded shell documents, or an error status. See [`routes`] for the
//! dispatch table.

mod assets;
pub mod error;
mod query;
mod response;
mod router;
pub mod routes;

pub use crate::assets::Shell;
pub use crate::query::Query;
pub use crate::router::SchemeRouter;
pub use crate::routes::Route;
