pub mod image;
pub mod phantom;
pub mod plan;
pub mod serialization;
