// Game state: the shared, mostly server-owned snapshot of one competition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::athlete::{AthleteId, Athletes};
use super::result::RaceResult;

/// A team's drafted roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamRoster {
    /// Display name of the team.
    #[serde(default)]
    pub team_name: String,
    /// Drafted men, in draft order.
    #[serde(default)]
    pub men: Vec<AthleteId>,
    /// Drafted women, in draft order.
    #[serde(default)]
    pub women: Vec<AthleteId>,
}

/// The complete state of one fantasy competition.
///
/// Replaced wholesale whenever a fresh snapshot arrives from the remote
/// service; patched field-by-field for optimistic local updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub athletes: Athletes,
    /// Participant identifiers in join order.
    #[serde(default)]
    pub players: Vec<String>,
    /// Set once the draft has run. Never goes back to `false`.
    #[serde(default)]
    pub draft_complete: bool,
    /// Team identifier -> roster.
    #[serde(default)]
    pub teams: HashMap<String, TeamRoster>,
    /// Athlete identifier -> result, filled in as results are entered.
    #[serde(default)]
    pub results: HashMap<AthleteId, RaceResult>,
}

/// A shallow partial of [`GameState`]. Each `Some` field replaces the
/// corresponding field wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameStatePatch {
    pub athletes: Option<Athletes>,
    pub players: Option<Vec<String>>,
    pub draft_complete: Option<bool>,
    pub teams: Option<HashMap<String, TeamRoster>>,
    pub results: Option<HashMap<AthleteId, RaceResult>>,
}

impl GameState {
    /// Shallow-merge `patch` into this state.
    ///
    /// A patch that tries to set `draft_complete` back to `false` after the
    /// draft has completed is ignored for that field.
    pub fn apply(&mut self, patch: GameStatePatch) {
        if let Some(athletes) = patch.athletes {
            self.athletes = athletes;
        }
        if let Some(players) = patch.players {
            self.players = players;
        }
        if let Some(draft_complete) = patch.draft_complete {
            if self.draft_complete && !draft_complete {
                warn!("Ignoring attempt to revert draft_complete to false");
            } else {
                self.draft_complete = draft_complete;
            }
        }
        if let Some(teams) = patch.teams {
            self.teams = teams;
        }
        if let Some(results) = patch.results {
            self.results = results;
        }
    }

    /// Return a copy of this state with `patch` applied.
    pub fn merged(&self, patch: GameStatePatch) -> GameState {
        let mut next = self.clone();
        next.apply(patch);
        next
    }
}
