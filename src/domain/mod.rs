pub mod artifact;
pub mod chore;
pub mod forecast;
pub mod fuel;
pub mod region;
pub mod snapshot;
pub mod time;

pub use artifact::*;
pub use chore::*;
pub use forecast::*;
pub use fuel::*;
pub use region::*;
pub use snapshot::*;
