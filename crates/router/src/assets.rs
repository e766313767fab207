//! Embedded shell assets.
//!
//! The HTML/CSS/JS shells served to the hosts are embedded into the binary at
//! compile time using [`rust-embed`](rust_embed). Each configured host owns
//! the directory its entry document lives in.

use crate::error::{ErrorKind, Result};
use exn::OptionExt;
use rust_embed::Embed;
use std::borrow::Cow;
use std::path::{Component, Path};

#[derive(Embed)]
#[folder = "../../assets/shell/"]
pub struct Shell;
impl Shell {
    /// Contents of an embedded file, by path relative to the shell root.
    pub fn load(path: &Path) -> Result<Cow<'static, [u8]>> {
        Self::get(&Self::key(path)).map(|f| f.data).ok_or_raise(|| ErrorKind::NotFound)
    }

    pub fn exists(path: &Path) -> bool {
        Self::get(&Self::key(path)).is_some()
    }

    pub fn content_type(path: &Path) -> String {
        mime_guess::from_path(path).first_or_octet_stream().to_string()
    }

    // Embedded names always use forward slashes.
    fn key(path: &Path) -> String {
        let parts: Vec<_> = path
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        parts.join("/")
    }
}
