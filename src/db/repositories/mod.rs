pub mod stickers;
