//! Finds the file backing a resource.
//!
//! Resources have been stored under three layouts over time, and all of
//! them are still honoured, in order of precedence:
//!
//! 1. whatever path the catalog recorded, if it looks like a current file,
//! 2. the current naming scheme, `<prefix>-<slug>.<ext>` (see [`naming`]),
//! 3. the legacy layout, the bare resource id with no extension.
//!
//! Finding a file anywhere but where the catalog says it is triggers a
//! one-off [`Migration`] that moves it into the current layout and tells the
//! catalog about it.

pub mod error;
mod locate;
pub mod naming;

pub use crate::locate::{Located, Locator, Migration, Strategy};
