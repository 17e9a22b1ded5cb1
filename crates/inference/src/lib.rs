mod ort;
mod traits;

pub mod blip;
pub mod m2m100;

pub use tokenizers;
pub use traits::*;
