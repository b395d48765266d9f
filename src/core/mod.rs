//! Coordinates, tile names and configuration shared by every layer.

pub mod config;
pub mod constants;
pub mod geo;
