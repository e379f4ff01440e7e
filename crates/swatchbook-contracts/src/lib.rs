pub mod events;
pub mod palette;
pub mod sources;
