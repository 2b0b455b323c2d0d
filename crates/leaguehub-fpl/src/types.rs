//! Typed views of the FPL payloads LeagueHub reads fields from.
//!
//! Only the fields the hub uses are named. Everything else is kept in
//! `extra` so a cached payload serialises back to what the API sent.
//! Team, picks and live payloads are passed through as
//! [`serde_json::Value`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueStandings {
    pub league: League,
    pub standings: Standings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct League {
    pub id: u64,
    pub name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standings {
    #[serde(default)]
    pub has_next: bool,
    pub page: u32,
    #[serde(default)]
    pub results: Vec<StandingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub id: u64,
    /// Team id, used for `/entry/{id}/` lookups.
    pub entry: u64,
    pub entry_name: String,
    pub player_name: String,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub total: i32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapStatic {
    #[serde(default)]
    pub events: Vec<GameweekEvent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BootstrapStatic {
    pub fn current_event(&self) -> Option<&GameweekEvent> {
        self.events.iter().find(|event| event.is_current)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameweekEvent {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub is_next: bool,
    #[serde(default)]
    pub finished: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_fields_survive_a_cache_round_trip() {
        let raw = json!({
            "league": { "id": 314, "name": "Overall", "scoring": "c" },
            "standings": {
                "has_next": false,
                "page": 1,
                "results": [{
                    "id": 1, "entry": 42, "entry_name": "Klopp Klub",
                    "player_name": "A Manager", "rank": 1, "total": 250,
                    "event_total": 71
                }]
            },
            "last_updated_data": "2024-09-01T10:00:00Z"
        });

        let standings: LeagueStandings = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(standings.standings.results[0].entry, 42);
        assert_eq!(serde_json::to_value(&standings).unwrap(), raw);
    }

    #[test]
    fn current_event_is_the_flagged_one() {
        let bootstrap: BootstrapStatic = serde_json::from_value(json!({
            "events": [
                { "id": 7, "is_current": false, "finished": true },
                { "id": 8, "is_current": true },
                { "id": 9, "is_next": true }
            ],
            "teams": []
        }))
        .unwrap();

        assert_eq!(bootstrap.current_event().map(|e| e.id), Some(8));
        assert!(bootstrap.extra.contains_key("teams"));
    }
}
