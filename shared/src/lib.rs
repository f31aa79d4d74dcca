pub mod actions;
pub mod error;
pub mod ladder;
pub mod player;
pub mod progression;

pub use actions::*;
pub use error::*;
pub use ladder::*;
pub use player::*;
pub use progression::*;
