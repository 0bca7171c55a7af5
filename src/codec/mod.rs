//! Wire encodings of API rows. Compact rows are positional by column; verbose rows group values
//! under `"<index>(<relation>)"` keys by attribute display name.

pub mod decode;
pub mod encode;

pub use decode::{decode_body, decode_compact, decode_verbose};
pub use encode::{display_name, encode_compact, encode_verbose};
