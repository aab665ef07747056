pub mod batch;
pub mod models;
pub mod pool;
