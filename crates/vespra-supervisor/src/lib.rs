pub mod admission;
pub mod supervisor;

pub use admission::{admit, Decision};
pub use supervisor::{Supervisor, SupervisorBuilder};
