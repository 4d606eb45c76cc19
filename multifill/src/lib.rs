#![allow(clippy::too_many_arguments)]

pub mod balance;
pub mod demo;
pub mod fill;
pub mod policy;
pub mod spheres;
