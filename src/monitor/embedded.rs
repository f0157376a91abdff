//! The monitoring page, compiled into the binary from `ui/`.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "ui/"]
pub struct Assets;
