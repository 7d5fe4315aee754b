// ⚙️ Nexus Engine - Orchestration
// One pure run: (transactions, rules, facts, valuation date) → report.
//
// States are independent and fan out over scoped worker threads; the years of
// a single state are always folded in ascending order on one thread.

use crate::aggregator::{aggregate_all, StateYearAggregate};
use crate::confidence::{ConfidenceInputs, ConfidenceScorer, DefaultConfidenceScorer};
use crate::config::EngineConfig;
use crate::economic::{classify_economic, round_percentage};
use crate::error::{NexusError, NexusResult};
use crate::liability::{AccrualTerms, LiabilityCalculator};
use crate::multi_year::{aggregate_years, MultiYearAggregate, YearResult};
use crate::physical::{classify_physical, CompanyFacts};
use crate::propagator::{propagate, NexusStatus, NexusType, PropagationPolicy, YearTriggers};
use crate::rules::{RuleProvider, StateThresholdRule};
use crate::transaction::{validate_batch, Transaction};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use tracing::{debug, debug_span, info, warn};

// ============================================================================
// REPORT TYPES
// ============================================================================

/// Recoverable problem surfaced next to the results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWarning {
    pub state: String,
    pub year: Option<i32>,
    pub message: String,
}

impl AnalysisWarning {
    fn missing_rule(state: &str, year: i32) -> Self {
        let err = NexusError::MissingThresholdRule {
            state: state.to_string(),
            year,
        };
        AnalysisWarning {
            state: state.to_string(),
            year: Some(year),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateAnalysis {
    pub state: String,
    pub years: Vec<YearResult>,
    pub first_nexus_year: Option<i32>,
    pub registered_on: Option<NaiveDate>,
    pub aggregate: MultiYearAggregate,
}

impl StateAnalysis {
    pub fn has_nexus(&self) -> bool {
        self.years
            .iter()
            .any(|y| y.nexus_status == NexusStatus::HasNexus)
    }

    pub fn latest_year(&self) -> Option<&YearResult> {
        self.years.last()
    }

    pub fn year(&self, year: i32) -> Option<&YearResult> {
        self.years.iter().find(|y| y.year == year)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NexusBreakdown {
    pub economic: usize,
    pub physical: usize,
    pub both: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproachingState {
    pub state: String,
    pub year: i32,
    pub total_sales: Decimal,
    pub threshold: Option<Decimal>,
    pub threshold_percentage: Decimal,
}

/// Derived dashboard figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub states_analyzed: usize,
    pub states_with_nexus: usize,
    pub total_estimated_liability: Decimal,
    pub nexus_breakdown: NexusBreakdown,
    pub approaching_threshold: Vec<ApproachingState>,
    pub vda_opportunity_total: Decimal,
}

impl ReportSummary {
    fn from_states(states: &BTreeMap<String, StateAnalysis>) -> Self {
        let mut summary = ReportSummary {
            states_analyzed: states.len(),
            states_with_nexus: 0,
            total_estimated_liability: Decimal::ZERO,
            nexus_breakdown: NexusBreakdown::default(),
            approaching_threshold: Vec::new(),
            vda_opportunity_total: Decimal::ZERO,
        };

        for (state, analysis) in states {
            if analysis.has_nexus() {
                summary.states_with_nexus += 1;
                summary.total_estimated_liability += analysis.aggregate.estimated_liability;
                summary.vda_opportunity_total += analysis.aggregate.vda_savings;

                match analysis.aggregate.nexus_type {
                    NexusType::Economic => summary.nexus_breakdown.economic += 1,
                    NexusType::Physical => summary.nexus_breakdown.physical += 1,
                    NexusType::Both => summary.nexus_breakdown.both += 1,
                    NexusType::None => {}
                }
            }

            if let Some(latest) = analysis
                .latest_year()
                .filter(|y| y.nexus_status == NexusStatus::Approaching)
            {
                summary.approaching_threshold.push(ApproachingState {
                    state: state.clone(),
                    year: latest.year,
                    total_sales: latest.total_sales,
                    threshold: latest.revenue_threshold,
                    threshold_percentage: latest.threshold_percentage,
                });
            }
        }

        summary
    }

    pub fn summary(&self) -> String {
        format!(
            "{} states analyzed: {} with nexus ({} economic, {} physical, {} both), {} approaching | liability ${:.2}, VDA savings ${:.2}",
            self.states_analyzed,
            self.states_with_nexus,
            self.nexus_breakdown.economic,
            self.nexus_breakdown.physical,
            self.nexus_breakdown.both,
            self.approaching_threshold.len(),
            self.total_estimated_liability,
            self.vda_opportunity_total
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub valuation_date: NaiveDate,
    pub states: BTreeMap<String, StateAnalysis>,
    /// States without a sales tax
    pub excluded_states: Vec<String>,
    pub warnings: Vec<AnalysisWarning>,
    pub summary: ReportSummary,
    /// SHA-256 of every other field, for idempotence checks
    pub fingerprint: String,
}

impl AnalysisReport {
    fn compute_fingerprint(&self) -> NexusResult<String> {
        let body = serde_json::to_vec(&(
            &self.valuation_date,
            &self.states,
            &self.excluded_states,
            &self.warnings,
            &self.summary,
        ))?;
        let mut hasher = Sha256::new();
        hasher.update(&body);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ============================================================================
// ENGINE
// ============================================================================

enum StateOutcome {
    Analyzed(StateAnalysis, Vec<AnalysisWarning>),
    Excluded(String),
    /// Nothing to analyze; a warning when declared presence went unused
    Empty(Option<AnalysisWarning>),
}

pub struct NexusEngine<'r> {
    rules: &'r dyn RuleProvider,
    scorer: Box<dyn ConfidenceScorer>,
    calculator: LiabilityCalculator,
    config: EngineConfig,
}

impl<'r> NexusEngine<'r> {
    pub fn new(rules: &'r dyn RuleProvider, config: EngineConfig) -> Self {
        NexusEngine {
            rules,
            scorer: Box::new(DefaultConfidenceScorer::new()),
            calculator: LiabilityCalculator::from_config(&config),
            config,
        }
    }

    pub fn with_scorer(mut self, scorer: Box<dyn ConfidenceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Run a full analysis. Input errors abort the run; rule gaps become warnings.
    pub fn analyze(
        &self,
        transactions: &[Transaction],
        facts: &CompanyFacts,
        valuation_date: NaiveDate,
    ) -> NexusResult<AnalysisReport> {
        self.config.validate()?;
        validate_batch(transactions)?;
        facts.validate()?;
        let aggregates = aggregate_all(transactions)?;

        let year_range = transactions
            .iter()
            .map(Transaction::year)
            .min()
            .zip(transactions.iter().map(Transaction::year).max())
            .map(|(lo, hi)| lo..=hi);

        let mut states: BTreeSet<String> = aggregates.keys().cloned().collect();
        states.extend(facts.presence_states());

        info!(
            transactions = transactions.len(),
            states = states.len(),
            %valuation_date,
            "Starting nexus analysis"
        );

        let outcomes: Vec<NexusResult<StateOutcome>> = if self.config.parallel && states.len() > 1 {
            let aggregates = &aggregates;
            let year_range = &year_range;
            std::thread::scope(|scope| {
                let handles: Vec<_> = states
                    .iter()
                    .map(|state| {
                        scope.spawn(move || {
                            self.analyze_state(
                                state,
                                aggregates.get(state),
                                facts,
                                year_range.clone(),
                                valuation_date,
                            )
                        })
                    })
                    .collect();

                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                    .collect()
            })
        } else {
            states
                .iter()
                .map(|state| {
                    self.analyze_state(
                        state,
                        aggregates.get(state),
                        facts,
                        year_range.clone(),
                        valuation_date,
                    )
                })
                .collect()
        };

        let mut analyzed = BTreeMap::new();
        let mut excluded_states = Vec::new();
        let mut warnings = Vec::new();

        for outcome in outcomes {
            match outcome? {
                StateOutcome::Analyzed(analysis, state_warnings) => {
                    warnings.extend(state_warnings);
                    analyzed.insert(analysis.state.clone(), analysis);
                }
                StateOutcome::Excluded(state) => excluded_states.push(state),
                StateOutcome::Empty(warning) => warnings.extend(warning),
            }
        }

        let summary = ReportSummary::from_states(&analyzed);
        let mut report = AnalysisReport {
            valuation_date,
            states: analyzed,
            excluded_states,
            warnings,
            summary,
            fingerprint: String::new(),
        };
        report.fingerprint = report.compute_fingerprint()?;

        info!(
            states_with_nexus = report.summary.states_with_nexus,
            total_liability = %report.summary.total_estimated_liability,
            warnings = report.warnings.len(),
            "Nexus analysis complete"
        );

        Ok(report)
    }

    /// Rule whose interest/penalty terms apply to accrued balances
    fn prevailing_rule(
        &self,
        state: &str,
        valuation_date: NaiveDate,
        year_rules: &BTreeMap<i32, &'r StateThresholdRule>,
    ) -> Option<&'r StateThresholdRule> {
        self.rules
            .rule_on(state, valuation_date)
            .filter(|r| r.has_sales_tax())
            .or_else(|| year_rules.values().next_back().copied())
    }

    fn analyze_state(
        &self,
        state: &str,
        years: Option<&BTreeMap<i32, StateYearAggregate>>,
        facts: &CompanyFacts,
        year_range: Option<RangeInclusive<i32>>,
        valuation_date: NaiveDate,
    ) -> NexusResult<StateOutcome> {
        let span = debug_span!("state", state = %state);
        let _enter = span.enter();

        // Years with sales, plus years in range where presence alone creates nexus
        let mut year_set: BTreeSet<i32> = years.map(|y| y.keys().copied().collect()).unwrap_or_default();
        if let Some(range) = year_range {
            for year in range {
                if classify_physical(facts.presence_for(state), state, year).physical_nexus {
                    year_set.insert(year);
                }
            }
        }
        if year_set.is_empty() {
            if facts.presence_for(state).next().is_none() {
                return Ok(StateOutcome::Empty(None));
            }
            warn!(state, "Physical presence declared but no analysis year covers it");
            return Ok(StateOutcome::Empty(Some(AnalysisWarning {
                state: state.to_string(),
                year: None,
                message: format!(
                    "Physical presence declared in {} but no transaction year on or after its effective date; state not analyzed",
                    state
                ),
            })));
        }

        let mut year_rules: BTreeMap<i32, &'r StateThresholdRule> = BTreeMap::new();
        for &year in &year_set {
            if let Some(rule) = self.rules.rule_for_year(state, year) {
                year_rules.insert(year, rule);
            }
        }

        if !year_rules.is_empty() && year_rules.values().all(|r| !r.has_sales_tax()) {
            info!(state, "State has no sales tax, excluded");
            return Ok(StateOutcome::Excluded(state.to_string()));
        }

        let mut warnings = Vec::new();
        let mut triggers = Vec::with_capacity(year_set.len());
        let empty_years = BTreeMap::new();
        let years = years.unwrap_or(&empty_years);

        for &year in &year_set {
            let agg = years.get(&year);
            let rule = year_rules.get(&year).copied();
            let physical = classify_physical(facts.presence_for(state), state, year);
            let confidence = self.scorer.score(&ConfidenceInputs::from_parts(agg, rule)).level;

            let mut t = YearTriggers {
                physical_nexus: physical.physical_nexus,
                physical_trigger_date: physical.earliest_trigger_date,
                confidence,
                ..YearTriggers::quiet(year)
            };

            match (rule, agg) {
                (None, _) => {
                    warn!(state, year, "No threshold rule for state/year");
                    warnings.push(AnalysisWarning::missing_rule(state, year));
                    t.rule_missing = true;
                }
                (Some(rule), Some(agg)) => {
                    let economic = classify_economic(agg, rule);
                    t.economic_nexus = economic.economic_nexus;
                    t.threshold_percentage = economic.threshold_percentage;
                    t.economic_exposure_start = economic.exposure_start(year);
                }
                (Some(_), None) => {}
            }

            triggers.push(t);
        }

        let policy = PropagationPolicy {
            approaching_threshold_pct: self.config.approaching_threshold_pct,
            registration_policy: self.config.registration_policy,
            registered_on: facts.registration_for(state),
        };
        let assessments = propagate(&triggers, &policy);
        let terms = self
            .prevailing_rule(state, valuation_date, &year_rules)
            .map(AccrualTerms::from);

        let mut results = Vec::with_capacity(assessments.len());
        for (assessment, t) in assessments.iter().zip(&triggers) {
            let year = assessment.year;
            let agg = years
                .get(&year)
                .cloned()
                .unwrap_or_else(|| StateYearAggregate::empty(state, year));
            let rule = year_rules.get(&year).copied();

            let liability = match (assessment.accrues_liability, rule, terms.as_ref()) {
                (true, Some(rule), Some(terms)) => {
                    let anchor = assessment
                        .anchor_date
                        .or_else(|| NaiveDate::from_ymd_opt(year, 1, 1))
                        .unwrap_or(valuation_date);
                    Some(self.calculator.calculate(&agg, rule, terms, anchor, valuation_date)?)
                }
                _ => None,
            };

            debug!(
                year,
                status = assessment.nexus_status.as_str(),
                sticky = assessment.sticky,
                "Year assessed"
            );

            results.push(YearResult {
                year,
                nexus_status: assessment.nexus_status,
                nexus_type: assessment.nexus_type,
                economic_nexus: t.economic_nexus && !t.rule_missing,
                physical_nexus: t.physical_nexus,
                total_sales: agg.total_sales,
                direct_sales: agg.direct_sales,
                marketplace_sales: agg.marketplace_sales,
                transaction_count: agg.transaction_count,
                threshold_percentage: round_percentage(assessment.threshold_percentage),
                revenue_threshold: rule.and_then(|r| r.revenue_threshold),
                transaction_threshold: rule.and_then(|r| r.transaction_threshold),
                confidence_level: assessment.confidence_level,
                first_nexus_year: assessment.first_nexus_year,
                sticky: assessment.sticky,
                registered: assessment.registered,
                liability,
            });
        }

        let Some(aggregate) = aggregate_years(&results) else {
            return Ok(StateOutcome::Empty(None));
        };

        Ok(StateOutcome::Analyzed(
            StateAnalysis {
                state: state.to_string(),
                first_nexus_year: aggregate.first_nexus_year,
                registered_on: policy.registered_on,
                years: results,
                aggregate,
            },
            warnings,
        ))
    }
}

/// One-shot analysis with default scoring
pub fn analyze(
    transactions: &[Transaction],
    rules: &dyn RuleProvider,
    facts: &CompanyFacts,
    valuation_date: NaiveDate,
    config: EngineConfig,
) -> NexusResult<AnalysisReport> {
    NexusEngine::new(rules, config).analyze(transactions, facts, valuation_date)
}

/// Today's date, for callers that want "now" as the valuation date
pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

// ============================================================================
// TESTS
// ============================================================================
