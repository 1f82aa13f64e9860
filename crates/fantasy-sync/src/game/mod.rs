// Game-state data model: athletes, teams, results.

pub mod athlete;
pub mod result;
pub mod state;

pub use athlete::{Athlete, AthleteId, Athletes};
pub use result::{RaceResult, ResultStatus};
pub use state::{GameState, GameStatePatch, TeamRoster};
