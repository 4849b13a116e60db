pub mod compose;
pub mod guidance;
pub mod status;
pub mod store;
