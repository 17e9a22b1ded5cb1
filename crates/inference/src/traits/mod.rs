mod caption;
mod translation;

pub use caption::*;
pub use translation::*;
