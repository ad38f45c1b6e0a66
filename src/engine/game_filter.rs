//! Upcoming-games filter.
//!
//! Keeps projections whose matchup text mentions a team playing soon.
//! Matching is case-insensitive containment in either direction, so
//! "Angels" matches "Los Angeles Angels" and vice versa. Team-name
//! collisions are possible and accepted.

use std::collections::BTreeSet;

use crate::types::{Game, Projection};

const MATCHUP_SEPARATOR: &str = " @ ";

/// Lower-cased team names appearing in `games`, from the `"Away @ Home"`
/// label and the explicit home/away fields.
pub fn team_names(games: &[Game]) -> BTreeSet<String> {
    let mut teams = BTreeSet::new();
    for game in games {
        if game.event_name.contains(MATCHUP_SEPARATOR) {
            teams.extend(game.event_name.split(MATCHUP_SEPARATOR).map(normalise));
        }
        teams.extend(game.home.as_deref().map(normalise));
        teams.extend(game.away.as_deref().map(normalise));
    }
    teams.retain(|t| !t.is_empty());
    teams
}

/// Keep projections whose matchup matches one of `teams`.
///
/// With no teams there is nothing to match against and every projection is
/// kept. Projections without matchup text are dropped otherwise.
pub fn filter_upcoming(projections: Vec<Projection>, teams: &BTreeSet<String>) -> Vec<Projection> {
    if teams.is_empty() {
        return projections;
    }
    projections
        .into_iter()
        .filter(|p| {
            let Some(matchup) = p.matchup.as_deref().map(normalise) else {
                return false;
            };
            !matchup.is_empty()
                && teams
                    .iter()
                    .any(|team| matchup.contains(team.as_str()) || team.contains(matchup.as_str()))
        })
        .collect()
}

fn normalise(name: &str) -> String {
    name.trim().to_lowercase()
}
