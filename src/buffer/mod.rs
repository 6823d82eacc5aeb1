mod lru_k_replacer;
mod mpage;
mod page_cache;

pub use lru_k_replacer::*;
pub use mpage::*;
pub use page_cache::*;
