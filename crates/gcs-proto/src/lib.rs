pub mod geo;
pub mod waypoints;
