pub mod assemble;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod depgraph;
pub mod expand;
pub mod generator;
pub mod hints;
pub mod library;
pub mod parts;
pub mod variants;
