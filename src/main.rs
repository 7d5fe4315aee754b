// 🧾 nexus-engine CLI
// Runs one analysis and prints the JSON report to stdout, the summary to stderr.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use nexus_engine::{
    analyze, load_transactions_csv, today, CompanyFacts, EngineConfig, RuleTable, VERSION,
};
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: nexus-engine analyze <transactions.csv> <rules.json> \
[--facts facts.json] [--config config.json] [--valuation-date YYYY-MM-DD]";

struct AnalyzeArgs {
    transactions: PathBuf,
    rules: PathBuf,
    facts: Option<PathBuf>,
    config: Option<PathBuf>,
    valuation_date: Option<NaiveDate>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("analyze") => run_analyze(parse_analyze_args(&args[2..])?),
        Some("--version") | Some("-V") => {
            println!("nexus-engine {}", VERSION);
            Ok(())
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

fn parse_analyze_args(args: &[String]) -> Result<AnalyzeArgs> {
    let mut positional = Vec::new();
    let mut facts = None;
    let mut config = None;
    let mut valuation_date = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--facts" => facts = Some(PathBuf::from(flag_value(&mut iter, arg)?)),
            "--config" => config = Some(PathBuf::from(flag_value(&mut iter, arg)?)),
            "--valuation-date" => {
                let raw = flag_value(&mut iter, arg)?;
                let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .with_context(|| format!("Invalid --valuation-date: {}", raw))?;
                valuation_date = Some(date);
            }
            flag if flag.starts_with("--") => bail!("Unknown option {}\n{}", flag, USAGE),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [transactions, rules]: [PathBuf; 2] = positional
        .try_into()
        .map_err(|_| anyhow::anyhow!("Expected a transactions CSV and a rules JSON\n{}", USAGE))?;

    Ok(AnalyzeArgs {
        transactions,
        rules,
        facts,
        config,
        valuation_date,
    })
}

fn flag_value<'a>(iter: &mut std::slice::Iter<'a, String>, flag: &str) -> Result<&'a str> {
    iter.next()
        .map(String::as_str)
        .with_context(|| format!("{} needs a value", flag))
}

fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    let transactions = load_transactions_csv(&args.transactions)
        .with_context(|| format!("Failed to load transactions from {:?}", args.transactions))?;
    let rules = RuleTable::from_file(&args.rules)?;
    let facts = match &args.facts {
        Some(path) => CompanyFacts::from_file(path)?,
        None => CompanyFacts::default(),
    };
    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    let valuation_date = args.valuation_date.unwrap_or_else(today);

    let report = analyze(&transactions, &rules, &facts, valuation_date, config)
        .context("Nexus analysis failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    eprintln!("\n📊 {}", report.summary.summary());
    for warning in &report.warnings {
        eprintln!("⚠️  {}", warning.message);
    }
    if !report.excluded_states.is_empty() {
        eprintln!("🚫 No sales tax: {}", report.excluded_states.join(", "));
    }
    eprintln!("🔑 Fingerprint: {}", report.fingerprint);

    Ok(())
}
