pub mod actor;
pub mod api;
pub mod events;
pub mod geo;
pub mod order;
pub mod provider;
pub mod schedule;

pub use actor::*;
pub use events::*;
pub use geo::*;
pub use order::*;
pub use provider::*;
pub use schedule::*;
