pub mod cache;
pub mod extract;
pub mod filesystem;
pub mod graph;
pub mod hasher;
pub mod pipeline;
pub mod resolve;
pub mod testcases;
