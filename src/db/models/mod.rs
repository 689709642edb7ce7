pub mod sticker;

pub use sticker::{NewSticker, Sticker, StickerStyle};
