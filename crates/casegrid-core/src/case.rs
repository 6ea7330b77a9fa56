use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{GridDimensions, RelationMode};

/// The parent record of every grid. The grid engine only reads list lengths and order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Case {
    pub id: String,
    pub title: String,
    pub clues: String,
    pub suspects: Vec<String>,
    pub locations: Vec<String>,
    pub weapons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Case {
    pub fn new(id: impl Into<String>, draft: CaseDraft) -> Self {
        Self {
            id: id.into(),
            title: draft.title,
            clues: draft.clues,
            suspects: draft.suspects,
            locations: draft.locations,
            weapons: draft.weapons,
            created_at: Utc::now(),
        }
    }

    /// Authoritative grid shape for `mode`, taken from the live entity lists.
    pub fn dimensions(&self, mode: RelationMode) -> GridDimensions {
        mode.dimensions(self.suspects.len(), self.locations.len(), self.weapons.len())
    }

    /// Replaces the editable fields, keeping id and creation time.
    pub fn apply(&mut self, draft: CaseDraft) {
        self.title = draft.title;
        self.clues = draft.clues;
        self.suspects = draft.suspects;
        self.locations = draft.locations;
        self.weapons = draft.weapons;
    }

    pub fn summary(&self) -> CaseSummary {
        CaseSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            created_at: self.created_at,
            suspect_count: self.suspects.len(),
            location_count: self.locations.len(),
            weapon_count: self.weapons.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub suspect_count: usize,
    pub location_count: usize,
    pub weapon_count: usize,
}

/// Create/update payload for a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub clues: String,
    #[serde(default)]
    pub suspects: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub weapons: Vec<String>,
}

impl CaseDraft {
    /// Trims every field, drops blank list entries and checks the case is usable.
    /// On failure returns every problem found, in form order.
    pub fn validate(self) -> Result<CaseDraft, Vec<String>> {
        let draft = CaseDraft {
            title: self.title.trim().to_string(),
            clues: self.clues.trim().to_string(),
            suspects: sanitize_list(self.suspects),
            locations: sanitize_list(self.locations),
            weapons: sanitize_list(self.weapons),
        };

        let mut errors = Vec::new();
        if draft.title.is_empty() {
            errors.push("Title is required.".to_string());
        }
        if draft.clues.is_empty() {
            errors.push("Clues are required.".to_string());
        }
        for (items, singular, plural) in [
            (&draft.suspects, "suspect", "Suspects"),
            (&draft.locations, "location", "Locations"),
            (&draft.weapons, "weapon", "Weapons"),
        ] {
            if items.is_empty() {
                errors.push(format!("At least one {singular} is required."));
            } else if !is_unique(items) {
                errors.push(format!("{plural} must be unique."));
            }
        }

        if errors.is_empty() {
            Ok(draft)
        } else {
            Err(errors)
        }
    }
}

fn sanitize_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn is_unique(items: &[String]) -> bool {
    let mut seen = HashSet::with_capacity(items.len());
    items.iter().all(|item| seen.insert(item.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> CaseDraft {
        CaseDraft {
            title: "  The Conservatory  ".into(),
            clues: "Someone lied.".into(),
            suspects: vec!["Plum".into(), " ".into(), "Scarlet".into()],
            locations: vec!["Library".into()],
            weapons: vec!["Rope".into(), "Candlestick ".into()],
        }
    }

    #[test_timeout::timeout]
    fn validate_trims_and_drops_blank_entries() {
        let draft = draft().validate().expect("valid draft");
        assert_eq!(draft.title, "The Conservatory");
        assert_eq!(draft.suspects, vec!["Plum", "Scarlet"]);
        assert_eq!(draft.weapons, vec!["Rope", "Candlestick"]);
    }

    #[test_timeout::timeout]
    fn validate_collects_every_error() {
        let errors = CaseDraft::default().validate().expect_err("empty draft");
        assert_eq!(
            errors,
            vec![
                "Title is required.",
                "Clues are required.",
                "At least one suspect is required.",
                "At least one location is required.",
                "At least one weapon is required.",
            ]
        );
    }

    #[test_timeout::timeout]
    fn validate_rejects_duplicate_names() {
        let mut duplicated = draft();
        duplicated.locations = vec!["Hall".into(), " Hall".into()];
        let errors = duplicated.validate().expect_err("duplicate location");
        assert_eq!(errors, vec!["Locations must be unique."]);
    }

    #[test_timeout::timeout]
    fn dimensions_follow_list_lengths() {
        let case = Case::new("c1", draft().validate().expect("valid"));
        assert_eq!(case.dimensions(RelationMode::WeaponsSuspects), GridDimensions::new(2, 2));
        assert_eq!(case.dimensions(RelationMode::LocationsSuspects), GridDimensions::new(2, 1));
        assert_eq!(case.dimensions(RelationMode::WeaponsLocations), GridDimensions::new(1, 2));
        assert_eq!(case.summary().suspect_count, 2);
    }
}
