//! Repository traits for catalog operations.

pub mod tokens;

pub use tokens::TokenRepo;
