//! On-device sticker library backed by SQLite.

mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::Database;
pub use models::{NewSticker, Sticker, StickerStyle};
