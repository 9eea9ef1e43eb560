use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::build_oracle;
use crate::error::Result;
use crate::fmt::money;
use crate::mail::parse_eml;
use crate::models::ParseOutcome;
use crate::oracle::CompletionOracle;
use crate::orchestrator::{parse_email, parse_regex_only};
use crate::parsers::for_bank;
use crate::settings::load_settings;
use crate::sync_log::SyncLog;

pub async fn run(file: &str, llm: bool) -> Result<()> {
    let settings = load_settings();
    let raw = std::fs::read(file)?;
    let email = parse_eml(&raw)?.into_raw_email();

    println!("From:     {}", email.sender);
    println!("Subject:  {}", email.subject);
    println!("Bank:     {} ({} parser)", email.bank.name(), for_bank(email.bank).key());

    let outcome = if llm {
        let oracle = build_oracle(&settings)?;
        if oracle.is_none() {
            println!("{}", "No API key configured; showing the regex result only.".yellow());
        }
        let mut log = SyncLog::new();
        parse_email(
            &email,
            oracle.as_ref().map(|o| o as &dyn CompletionOracle),
            &settings.pipeline,
            &mut log,
        )
        .await
    } else {
        let triage = parse_regex_only(&email, &settings.pipeline);
        if triage.needs_llm_fallback {
            let note = "Low confidence: this email would go to the LLM fallback during sync.";
            println!("{}", note.yellow());
        }
        triage.outcome
    };

    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &ParseOutcome) {
    let txn = match &outcome.result {
        Ok(txn) => txn,
        Err(reason) => {
            println!("{} {reason}", "Not parsed:".red().bold());
            return;
        }
    };
    let mut table = Table::new();
    table.add_row(vec![Cell::new("Amount"), Cell::new(money(txn.amount))]);
    table.add_row(vec![Cell::new("Type"), Cell::new(txn.txn_type.as_str())]);
    table.add_row(vec![Cell::new("Merchant"), Cell::new(&txn.merchant)]);
    table.add_row(vec![Cell::new("Date"), Cell::new(txn.date.format("%Y-%m-%d"))]);
    table.add_row(vec![
        Cell::new("Reference"),
        Cell::new(txn.reference.as_deref().unwrap_or("")),
    ]);
    table.add_row(vec![Cell::new("Confidence"), Cell::new(format!("{:.2}", txn.confidence))]);
    table.add_row(vec![
        Cell::new("Source"),
        Cell::new(if outcome.used_llm { "llm" } else { "regex" }),
    ]);
    println!("{table}");
}
