pub mod recorder;
pub mod sink;
pub mod summary;
pub mod trajectory;
