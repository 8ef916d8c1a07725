//! Input plumbing: locating event files and decoding them.

pub mod compression;
pub mod glob;
