use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::categorizer::{categorize_batch, safe_default, CategorizeRequest};
use crate::db::ensure_user;
use crate::error::Result;
use crate::fallback::parse_batch;
use crate::mail::{MailQuery, MailTransport, SyncMode};
use crate::models::{ParseFailure, ParsedTransaction, RawEmail, Transaction};
use crate::oracle::CompletionOracle;
use crate::orchestrator::{fallback_request, parse_regex_only};
use crate::settings::{PipelineConfig, Settings};
use crate::store;
use crate::sync_log::{LogLevel, Stage, SyncLog};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsingStats {
    pub regex: usize,
    pub llm: usize,
    pub llm_percentage: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub new_transactions: usize,
    pub duplicates: usize,
    pub errors: usize,
    pub total_processed: usize,
    pub parsing: ParsingStats,
    pub last_sync_at: Option<DateTime<Utc>>,
}

struct Candidate<'a> {
    email: &'a RawEmail,
    parsed: ParsedTransaction,
    used_llm: bool,
}

fn llm_percentage(regex: usize, llm: usize) -> f64 {
    let total = regex + llm;
    if total == 0 {
        return 0.0;
    }
    (llm as f64 * 1000.0 / total as f64).round() / 10.0
}

/// Parse, categorize and persist a batch of fetched emails for one user.
///
/// Runs three phases in order: deterministic parsing with message-id dedup,
/// batched oracle fallback for the emails the regex pass could not settle,
/// then batched categorization with a content-identity check before every
/// insert. Oracle trouble only ever degrades individual results; the only
/// errors returned are store failures.
pub async fn process_emails(
    conn: &Connection,
    user_id: &str,
    emails: &[RawEmail],
    oracle: Option<&dyn CompletionOracle>,
    config: &PipelineConfig,
    log: &mut SyncLog,
) -> Result<SyncResult> {
    let mut result = SyncResult {
        total_processed: emails.len(),
        ..SyncResult::default()
    };

    // Phase A
    let mut seen: HashSet<&str> = HashSet::new();
    let mut accepted: Vec<Candidate<'_>> = Vec::new();
    let mut pending: Vec<(&RawEmail, Option<ParsedTransaction>)> = Vec::new();
    for email in emails {
        let id = email.message_id.as_str();
        if !seen.insert(id) || store::message_exists(conn, user_id, id)? {
            result.duplicates += 1;
            log.email(LogLevel::Debug, Stage::Parse, id, "already imported");
            continue;
        }
        let triage = parse_regex_only(email, config);
        if triage.needs_llm_fallback {
            log.email(
                LogLevel::Debug,
                Stage::Parse,
                id,
                format!("{} parser needs fallback", triage.parser.key()),
            );
            pending.push((email, triage.outcome.into_transaction()));
        } else if let Some(parsed) = triage.outcome.into_transaction() {
            accepted.push(Candidate { email, parsed, used_llm: false });
        }
    }
    log.info(
        Stage::Parse,
        format!("{} accepted by regex, {} need fallback", accepted.len(), pending.len()),
    );

    // Phase B
    if !pending.is_empty() {
        let requests: Vec<_> = pending.iter().map(|(email, _)| fallback_request(email)).collect();
        let mut outcomes = parse_batch(&requests, oracle, config, log).await;
        for (email, partial) in pending {
            let llm = outcomes
                .remove(&email.message_id)
                .map(|o| o.result)
                .unwrap_or(Err(ParseFailure::LlmMissingId));
            match (llm, partial) {
                (Ok(parsed), _) => accepted.push(Candidate { email, parsed, used_llm: true }),
                (Err(_), Some(parsed)) => {
                    accepted.push(Candidate { email, parsed, used_llm: false })
                }
                (Err(reason), None) => {
                    result.errors += 1;
                    let id = email.message_id.as_str();
                    log.email(LogLevel::Warn, Stage::Fallback, id, reason.to_string());
                }
            }
        }
    }

    // Phase C
    let categories = store::list_categories(conn, user_id)?;
    log.debug(
        Stage::Categorize,
        format!("{} candidates against {} categories", accepted.len(), categories.len()),
    );
    let requests: Vec<CategorizeRequest> = accepted
        .iter()
        .map(|c| CategorizeRequest {
            id: c.email.message_id.clone(),
            merchant: c.parsed.merchant.clone(),
            amount: c.parsed.amount,
            txn_type: c.parsed.txn_type,
        })
        .collect();
    let mut categorized = categorize_batch(&requests, &categories, oracle, config, log).await;

    for candidate in accepted {
        let parsed = &candidate.parsed;
        let id = candidate.email.message_id.as_str();
        if store::content_exists(conn, user_id, parsed.amount, &parsed.merchant, parsed.date)? {
            result.duplicates += 1;
            log.email(
                LogLevel::Debug,
                Stage::Persist,
                id,
                "same amount, merchant and date already stored",
            );
            continue;
        }
        let category = categorized
            .remove(id)
            .unwrap_or_else(|| safe_default(&categories, &parsed.merchant));
        let txn = Transaction::from_parts(
            user_id,
            candidate.email,
            parsed,
            &category,
            candidate.used_llm,
        );
        store::insert_transaction(conn, &txn)?;
        result.new_transactions += 1;
        if candidate.used_llm {
            result.parsing.llm += 1;
        } else {
            result.parsing.regex += 1;
        }
    }

    result.parsing.llm_percentage = llm_percentage(result.parsing.regex, result.parsing.llm);
    result.success = true;
    log.info(
        Stage::Summary,
        format!(
            "{} new, {} duplicates, {} errors of {} processed",
            result.new_transactions, result.duplicates, result.errors, result.total_processed
        ),
    );
    Ok(result)
}

/// Fetch, process and advance the watermark. Transport and store failures abort
/// the run and leave the watermark where it was.
pub async fn run_sync(
    conn: &Connection,
    transport: &dyn MailTransport,
    oracle: Option<&dyn CompletionOracle>,
    settings: &Settings,
    mode: SyncMode,
    log: &mut SyncLog,
) -> Result<SyncResult> {
    let started_at = log.started_at();
    let user_id = settings.user_id.as_str();
    ensure_user(conn, user_id, settings.user_email.as_deref())?;

    let watermark = store::last_sync_at(conn, user_id)?;
    let query = MailQuery::build(mode, watermark, &settings.pipeline);
    log.info(Stage::Fetch, format!("query: {}", query.to_search_string()));

    let emails: Vec<RawEmail> = transport
        .fetch_all(&query)
        .await?
        .into_iter()
        .map(|m| m.into_raw_email())
        .collect();
    log.info(Stage::Fetch, format!("fetched {} messages", emails.len()));

    let mut result = process_emails(conn, user_id, &emails, oracle, &settings.pipeline, log).await?;
    store::set_last_sync_at(conn, user_id, started_at)?;
    result.last_sync_at = Some(started_at);
    Ok(result)
}
