pub mod access;
pub mod catalog;
pub mod core;
pub mod school_courses;
pub mod setup;
pub mod tree;
