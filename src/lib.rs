//! keymenu: a dmenu/rofi front-end for a credential database
//!
//! A background daemon keeps the database open and shows menus through the
//! configured selector whenever the `keymenu` launcher wakes it.

pub mod config;
pub mod daemon;
pub mod external;
pub mod logging;
pub mod menu;
pub mod vault;
