//! Collaborator implementations

pub mod memory;
