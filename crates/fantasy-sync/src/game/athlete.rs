// Athlete records as served in the game-state snapshot.

use serde::{Deserialize, Serialize};

/// Numeric athlete identifier, shared by rosters and race results.
pub type AthleteId = u32;

/// A single elite athlete available for drafting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Athlete {
    pub id: AthleteId,
    pub name: String,
    /// Country code (e.g. "KEN", "ETH").
    #[serde(default)]
    pub country: String,
    /// Personal best as a marathon mark (e.g. "2:03:36").
    #[serde(default)]
    pub personal_best: Option<String>,
    /// Current marathon world ranking, if ranked.
    #[serde(default)]
    pub world_ranking: Option<u32>,
    /// World Athletics competitor ID, when it has been matched.
    #[serde(default)]
    pub world_athletics_id: Option<String>,
    /// Draft salary, if the game uses a salary cap.
    #[serde(default)]
    pub salary: Option<u32>,
}

/// The two athlete fields, each kept in ranking order as served.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Athletes {
    #[serde(default)]
    pub men: Vec<Athlete>,
    #[serde(default)]
    pub women: Vec<Athlete>,
}

impl Athletes {
    /// Look up an athlete in either field by ID.
    pub fn find(&self, id: AthleteId) -> Option<&Athlete> {
        self.men
            .iter()
            .chain(self.women.iter())
            .find(|a| a.id == id)
    }

    /// Total number of athletes across both fields.
    pub fn len(&self) -> usize {
        self.men.len() + self.women.len()
    }

    pub fn is_empty(&self) -> bool {
        self.men.is_empty() && self.women.is_empty()
    }
}
