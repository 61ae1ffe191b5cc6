//! Serde extensions

pub mod orientation;
