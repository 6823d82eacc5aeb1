mod meta;
mod page;

pub use meta::*;
pub use page::*;
