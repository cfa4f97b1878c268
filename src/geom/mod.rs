//! Spherical geometry primitives.

pub mod convex;
pub mod sphere;
