pub mod v1;

pub use v1::{Credentials, Instance, PodInfo, PodRef, Status, API_VERSION};
