#[macro_use]
extern crate stump;

pub mod annotate;
pub mod context;
pub mod datasource;
pub mod error;
pub mod farneback;
pub mod flow;
pub mod frame;
pub mod framesink;
pub mod imageseq;
pub mod magnitude;
pub mod pipeline;
pub mod preprocess;
pub mod ser;
pub mod stats;
