pub mod clock;
pub mod models;
pub mod occurrence;
pub mod timer;
