//! Document processors

pub mod chunker;
