use colored::Colorize;
use comfy_table::{Cell, Table};
use tracing::warn;

use crate::cli::{build_oracle, open_db};
use crate::error::{BankmailError, Result};
use crate::mail::{EmlDirectory, SyncMode};
use crate::oracle::CompletionOracle;
use crate::settings::{load_settings, shellexpand_path};
use crate::sync::{run_sync, SyncResult};
use crate::sync_log::{LogLevel, SyncLog};

pub async fn run(source: Option<String>, full: bool, json: bool, verbose: bool) -> Result<()> {
    let settings = load_settings();
    let mailbox = source
        .map(|s| shellexpand_path(&s))
        .or_else(|| settings.mail_dir.clone())
        .ok_or_else(|| {
            BankmailError::Settings(
                "No mailbox configured. \
                 Pass --source <dir> or run `bankmail init --mail-dir <dir>`."
                    .to_string(),
            )
        })?;

    let conn = open_db(&settings)?;
    let oracle = build_oracle(&settings)?;
    let transport = EmlDirectory::new(&mailbox);
    let mode = if full { SyncMode::Full } else { SyncMode::Incremental };

    let mut log = SyncLog::new();
    let outcome = run_sync(
        &conn,
        &transport,
        oracle.as_ref().map(|o| o as &dyn CompletionOracle),
        &settings,
        mode,
        &mut log,
    )
    .await;

    let log_path = match log.flush_to(&settings.logs_dir()) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("could not write sync log: {e}");
            None
        }
    };
    if verbose {
        for entry in log.entries() {
            let line = format!(
                "{} {:<5} [{}] {}{}",
                entry.at.format("%H:%M:%S"),
                entry.level.as_str(),
                entry.stage.as_str(),
                entry.message_id.as_deref().map(|id| format!("{id}: ")).unwrap_or_default(),
                entry.message
            );
            match entry.level {
                LogLevel::Error => eprintln!("{}", line.red()),
                LogLevel::Warn => eprintln!("{}", line.yellow()),
                _ => eprintln!("{line}"),
            }
        }
    }

    let result = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    print_summary(&result);
    if let Some(path) = log_path {
        let warnings = log.count(LogLevel::Warn) + log.count(LogLevel::Error);
        println!("Log: {} ({warnings} warnings)", path.display());
    }
    Ok(())
}

fn print_summary(result: &SyncResult) {
    let mut table = Table::new();
    table.set_header(vec!["", "Count"]);
    table.add_row(vec![
        Cell::new("New transactions"),
        Cell::new(result.new_transactions.to_string().green().to_string()),
    ]);
    table.add_row(vec![Cell::new("Duplicates"), Cell::new(result.duplicates)]);
    let errors = if result.errors > 0 {
        result.errors.to_string().red().to_string()
    } else {
        result.errors.to_string()
    };
    table.add_row(vec![Cell::new("Errors"), Cell::new(errors)]);
    table.add_row(vec![Cell::new("Processed"), Cell::new(result.total_processed)]);
    table.add_row(vec![Cell::new("Parsed by regex"), Cell::new(result.parsing.regex)]);
    table.add_row(vec![Cell::new("Parsed by LLM"), Cell::new(result.parsing.llm)]);
    table.add_row(vec![
        Cell::new("LLM share"),
        Cell::new(format!("{:.1}%", result.parsing.llm_percentage)),
    ]);
    println!("Sync complete\n{table}");
}
