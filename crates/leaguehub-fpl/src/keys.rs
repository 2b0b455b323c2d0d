//! Cache key layout shared by every LeagueHub instance.

pub const BOOTSTRAP_STATIC: &str = "fpl:bootstrap_static";

pub fn league_standings(league_id: u64, page: u32) -> String {
    format!("fpl:league:{league_id}:standings:{page}")
}

pub fn team(team_id: u64) -> String {
    format!("fpl:team:{team_id}")
}

pub fn team_picks(team_id: u64, gameweek: u32) -> String {
    format!("fpl:team:{team_id}:picks:{gameweek}")
}

pub fn gameweek_live(gameweek: u32) -> String {
    format!("fpl:live:{gameweek}")
}

pub fn crest(team_name: &str) -> String {
    format!("crest:{team_name}")
}
