pub mod measure;
pub mod preprocess;
pub mod runnable;
pub mod serinfo;
