pub mod burndown;
pub mod history;
pub mod schedule;
pub mod stats;

pub use burndown::*;
pub use history::*;
pub use schedule::*;
pub use stats::*;
