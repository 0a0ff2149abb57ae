//! Domain model module declarations.

pub mod command;
pub mod message;
