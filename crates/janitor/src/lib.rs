pub mod api;
pub mod cluster;
pub mod controllers;
pub mod service;
pub mod source;
pub mod util;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
