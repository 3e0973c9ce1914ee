pub mod backend;
pub mod handle;
pub mod weights;
