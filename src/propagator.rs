// 🔁 Nexus Status Propagator
// Merges economic and physical verdicts into one status per year and carries
// nexus forward ("sticky nexus") with an explicit latch folded over the years
// in ascending order.

use crate::config::RegistrationPolicy;
use crate::confidence::ConfidenceLevel;
use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// STATUS / TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NexusStatus {
    None,
    Approaching,
    HasNexus,
    /// No threshold rule to judge by
    Unknown,
}

impl NexusStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NexusStatus::None => "none",
            NexusStatus::Approaching => "approaching",
            NexusStatus::HasNexus => "has_nexus",
            NexusStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NexusType {
    None,
    Economic,
    Physical,
    Both,
}

impl NexusType {
    pub fn from_triggers(economic: bool, physical: bool) -> Self {
        match (economic, physical) {
            (true, true) => NexusType::Both,
            (true, false) => NexusType::Economic,
            (false, true) => NexusType::Physical,
            (false, false) => NexusType::None,
        }
    }
}

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// One year's own triggers for a state, before propagation
#[derive(Debug, Clone, PartialEq)]
pub struct YearTriggers {
    pub year: i32,
    pub economic_nexus: bool,
    pub physical_nexus: bool,
    pub threshold_percentage: Decimal,
    /// First day of the month economic nexus was crossed
    pub economic_exposure_start: Option<NaiveDate>,
    pub physical_trigger_date: Option<NaiveDate>,
    pub rule_missing: bool,
    pub confidence: ConfidenceLevel,
}

impl YearTriggers {
    pub fn quiet(year: i32) -> Self {
        YearTriggers {
            year,
            economic_nexus: false,
            physical_nexus: false,
            threshold_percentage: Decimal::ZERO,
            economic_exposure_start: None,
            physical_trigger_date: None,
            rule_missing: false,
            confidence: ConfidenceLevel::High,
        }
    }

    /// Earliest exposure date behind this year's own triggers.
    /// A presence date before this year is kept as is; January 1 only stands in for a missing date.
    fn exposure_date(&self) -> Option<NaiveDate> {
        let jan1 = NaiveDate::from_ymd_opt(self.year, 1, 1)?;
        let economic = if self.economic_nexus {
            Some(self.economic_exposure_start.unwrap_or(jan1))
        } else {
            None
        };
        let physical = if self.physical_nexus {
            Some(self.physical_trigger_date.unwrap_or(jan1))
        } else {
            None
        };

        match (economic, physical) {
            (Some(e), Some(p)) => Some(e.min(p)),
            (e, p) => e.or(p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagationPolicy {
    pub approaching_threshold_pct: Decimal,
    pub registration_policy: RegistrationPolicy,
    pub registered_on: Option<NaiveDate>,
}

/// Status of one state in one year after propagation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexusAssessment {
    pub year: i32,
    pub nexus_status: NexusStatus,

    /// From this year's own triggers only
    pub nexus_type: NexusType,

    pub threshold_percentage: Decimal,

    /// Year nexus was first established by its own triggers
    pub first_nexus_year: Option<i32>,

    /// Interest accrual start, taken from the first nexus year
    pub anchor_date: Option<NaiveDate>,

    pub confidence_level: ConfidenceLevel,

    /// Status came from an earlier year, not from this year's triggers
    pub sticky: bool,

    pub registered: bool,

    /// Liability should be computed for this year
    pub accrues_liability: bool,
}

// ============================================================================
// PROPAGATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Latch {
    Open,
    Latched { first_year: i32, anchor: Option<NaiveDate> },
}

/// Fold the years of one state in ascending order
pub fn propagate(triggers: &[YearTriggers], policy: &PropagationPolicy) -> Vec<NexusAssessment> {
    let mut ordered: Vec<&YearTriggers> = triggers.iter().collect();
    ordered.sort_by_key(|t| t.year);

    let registration_year = policy.registered_on.map(|d| d.year());
    let mut latch = Latch::Open;
    let mut assessments = Vec::with_capacity(ordered.len());

    for t in ordered {
        let latched = matches!(latch, Latch::Latched { .. });
        let economic = t.economic_nexus && !t.rule_missing;
        let own = economic || t.physical_nexus;

        let nexus_status = if own || latched {
            NexusStatus::HasNexus
        } else if t.rule_missing {
            NexusStatus::Unknown
        } else if t.threshold_percentage >= policy.approaching_threshold_pct {
            NexusStatus::Approaching
        } else {
            NexusStatus::None
        };

        if own && !latched {
            let own_triggers = YearTriggers {
                economic_nexus: economic,
                ..t.clone()
            };
            latch = Latch::Latched {
                first_year: t.year,
                anchor: own_triggers.exposure_date(),
            };
        }

        let (first_nexus_year, anchor_date) = match latch {
            Latch::Latched { first_year, anchor } if nexus_status == NexusStatus::HasNexus => {
                (Some(first_year), anchor)
            }
            _ => (None, None),
        };

        let registered = registration_year.map_or(false, |ry| ry <= t.year);
        let cleared = policy.registration_policy == RegistrationPolicy::ClearsExposure
            && registration_year.map_or(false, |ry| ry < t.year);

        assessments.push(NexusAssessment {
            year: t.year,
            nexus_status,
            nexus_type: NexusType::from_triggers(economic, t.physical_nexus),
            threshold_percentage: t.threshold_percentage,
            first_nexus_year,
            anchor_date,
            confidence_level: if t.rule_missing {
                ConfidenceLevel::Low
            } else {
                t.confidence
            },
            sticky: nexus_status == NexusStatus::HasNexus && !own,
            registered,
            accrues_liability: nexus_status == NexusStatus::HasNexus
                && !t.rule_missing
                && !cleared,
        });

        // Registration in this year stops the carry into the next one
        if policy.registration_policy == RegistrationPolicy::ClearsExposure && registered {
            latch = Latch::Open;
        }
    }

    assessments
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn policy() -> PropagationPolicy {
        PropagationPolicy {
            approaching_threshold_pct: dec!(90),
            registration_policy: RegistrationPolicy::PresentationOnly,
            registered_on: None,
        }
    }

    fn year(y: i32, pct: Decimal, economic: bool) -> YearTriggers {
        YearTriggers {
            economic_nexus: economic,
            threshold_percentage: pct,
            economic_exposure_start: if economic { Some(d(y, 7, 1)) } else { None },
            ..YearTriggers::quiet(y)
        }
    }

    #[test]
    fn test_sticky_nexus_three_years() {
        let out = propagate(
            &[year(2021, dec!(80), false), year(2022, dec!(125), true), year(2023, dec!(50), false)],
            &policy(),
        );

        assert_eq!(out[0].nexus_status, NexusStatus::None);
        assert_eq!(out[0].first_nexus_year, None);

        assert_eq!(out[1].nexus_status, NexusStatus::HasNexus);
        assert_eq!(out[1].nexus_type, NexusType::Economic);
        assert_eq!(out[1].first_nexus_year, Some(2022));
        assert_eq!(out[1].anchor_date, Some(d(2022, 7, 1)));
        assert!(!out[1].sticky);

        assert_eq!(out[2].nexus_status, NexusStatus::HasNexus);
        assert_eq!(out[2].nexus_type, NexusType::None);
        assert_eq!(out[2].first_nexus_year, Some(2022));
        assert_eq!(out[2].anchor_date, Some(d(2022, 7, 1)));
        assert!(out[2].sticky);
        assert!(out[2].accrues_liability);
    }

    #[test]
    fn test_approaching_only_without_nexus() {
        let out = propagate(&[year(2021, dec!(92.5), false), year(2022, dec!(89.99), false)], &policy());
        assert_eq!(out[0].nexus_status, NexusStatus::Approaching);
        assert_eq!(out[1].nexus_status, NexusStatus::None);
    }

    #[test]
    fn test_unordered_input_is_folded_ascending() {
        let out = propagate(&[year(2023, dec!(10), false), year(2022, dec!(150), true)], &policy());
        assert_eq!(out[0].year, 2022);
        assert_eq!(out[1].nexus_status, NexusStatus::HasNexus);
        assert!(out[1].sticky);
    }

    #[test]
    fn test_physical_anchor_is_presence_date() {
        let mut y = YearTriggers::quiet(2021);
        y.physical_nexus = true;
        y.physical_trigger_date = Some(d(2018, 5, 1));

        let out = propagate(&[y], &policy());
        assert_eq!(out[0].nexus_type, NexusType::Physical);
        assert_eq!(out[0].anchor_date, Some(d(2018, 5, 1)));
    }

    #[test]
    fn test_physical_anchor_without_date_falls_back_to_year_start() {
        let mut y = YearTriggers::quiet(2021);
        y.physical_nexus = true;

        let out = propagate(&[y], &policy());
        assert_eq!(out[0].anchor_date, Some(d(2021, 1, 1)));
    }

    #[test]
    fn test_approaching_uses_unrounded_percentage() {
        let out = propagate(&[year(2023, dec!(89.995), false), year(2024, dec!(90), false)], &policy());
        assert_eq!(out[0].nexus_status, NexusStatus::None);
        assert_eq!(out[1].nexus_status, NexusStatus::Approaching);
    }

    #[test]
    fn test_both_triggers_take_earlier_date() {
        let mut y = year(2022, dec!(200), true);
        y.physical_nexus = true;
        y.physical_trigger_date = Some(d(2022, 3, 15));

        let out = propagate(&[y], &policy());
        assert_eq!(out[0].nexus_type, NexusType::Both);
        assert_eq!(out[0].anchor_date, Some(d(2022, 3, 15)));
    }

    #[test]
    fn test_missing_rule_unknown_unless_latched() {
        let mut gap = year(2021, Decimal::ZERO, false);
        gap.rule_missing = true;
        let out = propagate(&[gap.clone()], &policy());
        assert_eq!(out[0].nexus_status, NexusStatus::Unknown);
        assert_eq!(out[0].confidence_level, ConfidenceLevel::Low);

        gap.year = 2023;
        let out = propagate(&[year(2022, dec!(150), true), gap], &policy());
        assert_eq!(out[1].nexus_status, NexusStatus::HasNexus);
        assert_eq!(out[1].confidence_level, ConfidenceLevel::Low);
        assert!(!out[1].accrues_liability);
    }

    #[test]
    fn test_registration_presentation_only() {
        let mut p = policy();
        p.registered_on = Some(d(2022, 9, 1));

        let out = propagate(
            &[year(2021, dec!(150), true), year(2022, dec!(10), false), year(2023, dec!(10), false)],
            &p,
        );
        assert!(!out[0].registered);
        assert!(out[1].registered);
        assert!(out.iter().all(|a| a.nexus_status == NexusStatus::HasNexus));
        assert!(out.iter().all(|a| a.accrues_liability));
    }

    #[test]
    fn test_registration_clears_exposure() {
        let mut p = policy();
        p.registration_policy = RegistrationPolicy::ClearsExposure;
        p.registered_on = Some(d(2022, 9, 1));

        let out = propagate(
            &[year(2021, dec!(150), true), year(2022, dec!(10), false), year(2023, dec!(10), false)],
            &p,
        );
        // Registration year itself still carries pre-registration exposure
        assert_eq!(out[1].nexus_status, NexusStatus::HasNexus);
        assert!(out[1].accrues_liability);

        assert_eq!(out[2].nexus_status, NexusStatus::None);
        assert!(!out[2].accrues_liability);
    }
}
