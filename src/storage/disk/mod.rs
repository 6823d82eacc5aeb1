mod disk_manager;
mod mem_store;
mod page_store;

pub use disk_manager::*;
pub use mem_store::*;
pub use page_store::*;
