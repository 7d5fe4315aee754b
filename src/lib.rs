// Nexus Engine - Core Library
// Sales tax nexus determination and liability estimation, exposed for the CLI and tests

pub mod aggregator;  // Transaction Aggregator
pub mod confidence;  // Confidence scoring
pub mod config;      // Engine configuration
pub mod economic;    // Economic Classifier
pub mod engine;      // Orchestration + report
pub mod error;       // Error taxonomy
pub mod liability;   // Liability Calculator
pub mod multi_year;  // Multi-Year Aggregator
pub mod physical;    // Physical Classifier + company facts
pub mod propagator;  // Status Propagator (sticky nexus)
pub mod rules;       // Threshold Rule Provider
pub mod transaction; // Transaction model + CSV loading

// Re-export commonly used types
pub use aggregator::{aggregate_all, aggregate_state, MonthlyTotal, StateYearAggregate};
pub use confidence::{
    ConfidenceAssessment, ConfidenceInputs, ConfidenceIssue, ConfidenceLevel, ConfidenceScorer,
    DefaultConfidenceScorer, Severity,
};
pub use config::{EngineConfig, RegistrationPolicy};
pub use economic::{classify_economic, round_percentage, threshold_percentage, EconomicVerdict};
pub use engine::{
    analyze, today, AnalysisReport, AnalysisWarning, ApproachingState, NexusBreakdown,
    NexusEngine, ReportSummary, StateAnalysis,
};
pub use error::{NexusError, NexusResult};
pub use liability::{AccrualTerms, LiabilityCalculator, LiabilityResult};
pub use multi_year::{aggregate_years, MultiYearAggregate, YearResult};
pub use physical::{
    classify_physical, CompanyFacts, PhysicalPresenceFact, PhysicalVerdict, PresenceKind,
    RegistrationFact,
};
pub use propagator::{
    propagate, NexusAssessment, NexusStatus, NexusType, PropagationPolicy, YearTriggers,
};
pub use rules::{InterestMethod, RuleProvider, RuleTable, StateThresholdRule, ThresholdOperator};
pub use transaction::{
    is_valid_state_code, load_transactions_csv, read_transactions, validate_batch, Channel,
    Transaction, TransactionRecord,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
