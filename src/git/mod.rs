pub mod repository;
pub mod tree;
