//! Batched oracle parsing for emails the regex parsers could not handle.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::extract::{amount_to_minor_units, extract_date, major_to_minor};
use crate::models::{Bank, ParseFailure, ParseOutcome, ParsedTransaction, TxnType};
use crate::oracle::{complete_with_timeout, decode_reply, CompletionOracle};
use crate::parsers::normalize_merchant;
use crate::settings::PipelineConfig;
use crate::sync_log::{LogLevel, Stage, SyncLog};

/// One email queued for fallback parsing. `body` is already normalized text.
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub id: String,
    pub body: String,
    pub subject: String,
    pub date: DateTime<Utc>,
    pub bank: Bank,
}

const SYSTEM_PROMPT: &str = "You extract transactions from Indian bank alert emails. \
Reply with a single JSON object of the form \
{\"transactions\": [{\"id\": string, \"amount\": number, \"type\": \"debit\"|\"credit\", \
\"merchant\": string, \"date\": \"YYYY-MM-DD\", \"reference\": string|null}]}. \
Return exactly one record per email id you were given. Amounts are in rupees, not paise. \
The merchant is the counterparty: the shop, person or business, never the account holder. \
Use null for any field you cannot find.";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FallbackReply {
    Wrapped { transactions: Vec<LlmRecord> },
    Bare(Vec<LlmRecord>),
}

impl FallbackReply {
    fn into_records(self) -> Vec<LlmRecord> {
        match self {
            Self::Wrapped { transactions } => transactions,
            Self::Bare(records) => records,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LlmRecord {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    amount: Value,
    #[serde(default, rename = "type")]
    txn_type: Option<String>,
    #[serde(default)]
    merchant: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    reference: Option<String>,
}

fn id_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount_of(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(major_to_minor),
        Value::String(s) => amount_to_minor_units(s),
        _ => None,
    }
}

fn date_of(raw: Option<&str>, fallback: NaiveDate) -> NaiveDate {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().or_else(|| extract_date(s)))
        .unwrap_or(fallback)
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn build_prompt(batch: &[FallbackRequest], body_chars: usize) -> String {
    let mut prompt = format!("Extract one transaction for each of these {} emails.\n", batch.len());
    for req in batch {
        prompt.push_str(&format!(
            "\n---\nid: {}\nbank: {}\nsubject: {}\nreceived: {}\nbody:\n{}\n",
            req.id,
            req.bank.name(),
            req.subject,
            req.date.format("%Y-%m-%d"),
            truncate_chars(&req.body, body_chars),
        ));
    }
    prompt
}

fn record_to_outcome(
    record: &LlmRecord,
    req: &FallbackRequest,
    config: &PipelineConfig,
) -> ParseOutcome {
    let amount = amount_of(&record.amount);
    let txn_type = record.txn_type.as_deref().and_then(TxnType::parse);
    let merchant = record
        .merchant
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(normalize_merchant);

    let (Some(amount), Some(txn_type), Some(merchant)) = (amount, txn_type, merchant) else {
        return ParseOutcome::from_llm(Err(ParseFailure::LlmIncomplete));
    };

    ParseOutcome::from_llm(Ok(ParsedTransaction {
        amount,
        txn_type,
        merchant,
        date: date_of(record.date.as_deref(), req.date.date_naive()),
        reference: record.reference.clone().filter(|r| !r.trim().is_empty()),
        bank: req.bank,
        confidence: config.llm_confidence,
    }))
}

/// Parse every request through the oracle, one call per batch.
/// Every input id gets exactly one outcome; failures are values, never dropped.
pub async fn parse_batch(
    requests: &[FallbackRequest],
    oracle: Option<&dyn CompletionOracle>,
    config: &PipelineConfig,
    log: &mut SyncLog,
) -> HashMap<String, ParseOutcome> {
    let mut outcomes = HashMap::with_capacity(requests.len());
    if requests.is_empty() {
        return outcomes;
    }

    let Some(oracle) = oracle else {
        log.warn(
            Stage::Fallback,
            format!("oracle not configured; {} emails left unparsed", requests.len()),
        );
        for req in requests {
            outcomes.insert(
                req.id.clone(),
                ParseOutcome::from_llm(Err(ParseFailure::LlmNotConfigured)),
            );
        }
        return outcomes;
    };

    let batch_size = config.fallback_batch_size.max(1);
    let batch_count = requests.len().div_ceil(batch_size);
    for (index, batch) in requests.chunks(batch_size).enumerate() {
        let batch_no = index + 1;
        let started = Instant::now();
        let prompt = build_prompt(batch, config.fallback_body_chars);

        let reply =
            complete_with_timeout(oracle, SYSTEM_PROMPT, &prompt, config.oracle_timeout_secs)
                .await
                .and_then(|raw| decode_reply::<FallbackReply>(&raw).map_err(Into::into));
        let records = match reply {
            Ok(reply) => reply.into_records(),
            Err(e) => {
                log.error(
                    Stage::Fallback,
                    format!("batch {batch_no}/{batch_count} failed ({} emails): {e}", batch.len()),
                );
                for req in batch {
                    outcomes.insert(
                        req.id.clone(),
                        ParseOutcome::from_llm(Err(ParseFailure::LlmBatchFailed(e.to_string()))),
                    );
                }
                continue;
            }
        };

        let mut by_id: HashMap<String, &LlmRecord> = HashMap::new();
        for record in &records {
            if let Some(id) = id_of(&record.id) {
                by_id.entry(id).or_insert(record);
            }
        }

        let mut parsed = 0;
        for req in batch {
            let outcome = match by_id.get(&req.id) {
                Some(record) => record_to_outcome(record, req, config),
                None => ParseOutcome::from_llm(Err(ParseFailure::LlmMissingId)),
            };
            match &outcome.result {
                Ok(_) => parsed += 1,
                Err(reason) => {
                    log.email(LogLevel::Warn, Stage::Fallback, &req.id, reason.to_string())
                }
            }
            outcomes.insert(req.id.clone(), outcome);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(batch = batch_no, batch_size = batch.len(), duration_ms, "fallback batch done");
        log.info(
            Stage::Fallback,
            format!("batch {batch_no}/{batch_count}: {parsed}/{} parsed", batch.len()),
        );
    }
    outcomes
}
