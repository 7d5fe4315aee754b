// 🏢 Physical Nexus Classifier
// Presence (employees, inventory, offices) creates nexus regardless of sales
// volume, from its effective date onward.

use crate::error::{NexusError, NexusResult};
use crate::transaction::is_valid_state_code;
use anyhow::{Context as AnyhowContext, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// FACTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    RemoteEmployee,
    /// Inventory held by a 3PL or Amazon FBA warehouse
    #[serde(rename = "inventory_3pl", alias = "fba")]
    Inventory3pl,
    Office,
}

/// Client-declared physical presence in a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalPresenceFact {
    pub state: String,
    pub kind: PresenceKind,
    pub effective_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PhysicalPresenceFact {
    pub fn new(state: &str, kind: PresenceKind, effective_date: NaiveDate) -> Self {
        PhysicalPresenceFact {
            state: state.to_uppercase(),
            kind,
            effective_date,
            description: None,
        }
    }
}

/// Sales tax registration obtained in a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationFact {
    pub state: String,
    pub registered_on: NaiveDate,
}

/// Everything the intake workflow declares about a company besides its sales
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyFacts {
    #[serde(default)]
    pub presence: Vec<PhysicalPresenceFact>,
    #[serde(default)]
    pub registrations: Vec<RegistrationFact>,
}

impl CompanyFacts {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read facts file: {:?}", path.as_ref()))?;
        let mut facts: CompanyFacts =
            serde_json::from_str(&content).context("Failed to parse facts JSON")?;

        for fact in &mut facts.presence {
            fact.state = fact.state.to_uppercase();
        }
        for reg in &mut facts.registrations {
            reg.state = reg.state.to_uppercase();
        }
        Ok(facts)
    }

    /// Reject facts naming an unknown or non-canonical state code.
    /// `line` in the error is the 1-based position within its list.
    pub fn validate(&self) -> NexusResult<()> {
        for (idx, fact) in self.presence.iter().enumerate() {
            if !is_valid_state_code(&fact.state) {
                return Err(NexusError::malformed(
                    idx + 1,
                    format!("presence fact with unknown state code: {:?}", fact.state),
                ));
            }
        }
        for (idx, reg) in self.registrations.iter().enumerate() {
            if !is_valid_state_code(&reg.state) {
                return Err(NexusError::malformed(
                    idx + 1,
                    format!("registration with unknown state code: {:?}", reg.state),
                ));
            }
        }
        Ok(())
    }

    pub fn presence_for<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a PhysicalPresenceFact> + 'a {
        self.presence.iter().filter(move |f| f.state == state)
    }

    /// Earliest registration date for a state
    pub fn registration_for(&self, state: &str) -> Option<NaiveDate> {
        self.registrations
            .iter()
            .filter(|r| r.state == state)
            .map(|r| r.registered_on)
            .min()
    }

    /// States named by any presence fact
    pub fn presence_states(&self) -> Vec<String> {
        let mut states: Vec<String> = self.presence.iter().map(|f| f.state.clone()).collect();
        states.sort();
        states.dedup();
        states
    }
}

// ============================================================================
// VERDICT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalVerdict {
    pub physical_nexus: bool,
    pub earliest_trigger_date: Option<NaiveDate>,
    /// Kinds of presence in effect by year end
    pub kinds: Vec<PresenceKind>,
}

impl PhysicalVerdict {
    pub fn none() -> Self {
        PhysicalVerdict {
            physical_nexus: false,
            earliest_trigger_date: None,
            kinds: Vec::new(),
        }
    }
}

/// Physical nexus holds for `year` if any fact for `state` took effect on or before December 31 of that year
pub fn classify_physical<'a, I>(facts: I, state: &str, year: i32) -> PhysicalVerdict
where
    I: IntoIterator<Item = &'a PhysicalPresenceFact>,
{
    let mut verdict = PhysicalVerdict::none();

    for fact in facts {
        if fact.state != state || fact.effective_date.year() > year {
            continue;
        }
        verdict.physical_nexus = true;
        verdict.earliest_trigger_date = Some(match verdict.earliest_trigger_date {
            Some(current) => current.min(fact.effective_date),
            None => fact.effective_date,
        });
        if !verdict.kinds.contains(&fact.kind) {
            verdict.kinds.push(fact.kind);
        }
    }

    verdict.kinds.sort();
    verdict
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_presence_triggers_from_effective_year_onward() {
        let facts = vec![PhysicalPresenceFact::new("TX", PresenceKind::RemoteEmployee, d(2022, 11, 15))];

        assert!(!classify_physical(&facts, "TX", 2021).physical_nexus);

        let v2022 = classify_physical(&facts, "TX", 2022);
        assert!(v2022.physical_nexus);
        assert_eq!(v2022.earliest_trigger_date, Some(d(2022, 11, 15)));

        // No ongoing re-evaluation
        assert!(classify_physical(&facts, "TX", 2025).physical_nexus);
    }

    #[test]
    fn test_earliest_trigger_across_facts() {
        let facts = vec![
            PhysicalPresenceFact::new("PA", PresenceKind::Office, d(2021, 6, 1)),
            PhysicalPresenceFact::new("PA", PresenceKind::Inventory3pl, d(2020, 3, 1)),
            PhysicalPresenceFact::new("NJ", PresenceKind::Office, d(2019, 1, 1)),
        ];
        let verdict = classify_physical(&facts, "PA", 2023);

        assert_eq!(verdict.earliest_trigger_date, Some(d(2020, 3, 1)));
        assert_eq!(verdict.kinds, vec![PresenceKind::Inventory3pl, PresenceKind::Office]);
    }

    #[test]
    fn test_validate_rejects_bad_state_codes() {
        let lower = CompanyFacts {
            presence: vec![PhysicalPresenceFact {
                state: "ny".to_string(),
                kind: PresenceKind::Office,
                effective_date: d(2020, 1, 1),
                description: None,
            }],
            registrations: vec![],
        };
        assert!(matches!(lower.validate(), Err(NexusError::MalformedRecord { line: 1, .. })));

        let unknown = CompanyFacts {
            presence: vec![
                PhysicalPresenceFact::new("NY", PresenceKind::Office, d(2020, 1, 1)),
                PhysicalPresenceFact::new("XX", PresenceKind::Office, d(2020, 1, 1)),
            ],
            registrations: vec![],
        };
        assert!(matches!(unknown.validate(), Err(NexusError::MalformedRecord { line: 2, .. })));

        let registration = CompanyFacts {
            presence: vec![],
            registrations: vec![RegistrationFact {
                state: "Tex".to_string(),
                registered_on: d(2021, 1, 1),
            }],
        };
        assert!(registration.validate().is_err());
        assert!(CompanyFacts::default().validate().is_ok());
    }

    #[test]
    fn test_other_states_ignored() {
        let facts = vec![PhysicalPresenceFact::new("NJ", PresenceKind::Office, d(2019, 1, 1))];
        assert_eq!(classify_physical(&facts, "NY", 2023), PhysicalVerdict::none());
    }

    #[test]
    fn test_company_facts_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"presence": [{{"state": "wa", "kind": "fba", "effective_date": "2021-02-01"}}],
                "registrations": [{{"state": "WA", "registered_on": "2022-07-01"}},
                                  {{"state": "WA", "registered_on": "2022-01-01"}}]}}"#
        )
        .unwrap();

        let facts = CompanyFacts::from_file(file.path()).unwrap();
        assert_eq!(facts.presence[0].kind, PresenceKind::Inventory3pl);
        assert_eq!(facts.presence_for("WA").count(), 1);
        assert_eq!(facts.registration_for("WA"), Some(d(2022, 1, 1)));
        assert_eq!(facts.presence_states(), vec!["WA".to_string()]);
    }
}
