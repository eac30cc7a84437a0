pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod presence;
