use crate::fallback::{parse_batch, FallbackRequest};
use crate::models::{ParseFailure, ParseOutcome, RawEmail};
use crate::normalizer::normalize;
use crate::oracle::CompletionOracle;
use crate::parsers::{for_bank, ParserKind};
use crate::settings::PipelineConfig;
use crate::sync_log::{LogLevel, Stage, SyncLog};

/// Pass-1 verdict for one email.
#[derive(Debug, Clone)]
pub struct Triage {
    pub parser: ParserKind,
    pub outcome: ParseOutcome,
    pub needs_llm_fallback: bool,
}

pub fn needs_fallback(outcome: &ParseOutcome, threshold: f64) -> bool {
    match outcome.transaction() {
        Some(txn) => txn.confidence < threshold || !txn.has_merchant(),
        None => true,
    }
}

/// Run the bank's deterministic parser only.
pub fn parse_regex_only(email: &RawEmail, config: &PipelineConfig) -> Triage {
    let parser = for_bank(email.bank);
    let outcome = parser.parse(&email.body, &email.subject, email.date, email.bank);
    let needs_llm_fallback = needs_fallback(&outcome, config.confidence_threshold);
    Triage { parser, outcome, needs_llm_fallback }
}

pub fn fallback_request(email: &RawEmail) -> FallbackRequest {
    FallbackRequest {
        id: email.message_id.clone(),
        body: normalize(&email.body),
        subject: email.subject.clone(),
        date: email.date,
        bank: email.bank,
    }
}

/// Pick between a deterministic and an oracle result for the same email.
/// The deterministic one wins only when it is strictly more confident and
/// has a merchant; a failed oracle result never wins.
pub fn arbitrate(deterministic: ParseOutcome, llm: ParseOutcome) -> ParseOutcome {
    let (det_txn, llm_txn) = match (deterministic.transaction(), llm.transaction()) {
        (_, None) => return deterministic,
        (None, Some(_)) => return llm,
        (Some(d), Some(l)) => (d, l),
    };
    if det_txn.confidence > llm_txn.confidence && det_txn.has_merchant() {
        deterministic
    } else {
        llm
    }
}

/// Single-email path: regex first, oracle when the result is not trustworthy.
pub async fn parse_email(
    email: &RawEmail,
    oracle: Option<&dyn CompletionOracle>,
    config: &PipelineConfig,
    log: &mut SyncLog,
) -> ParseOutcome {
    let triage = parse_regex_only(email, config);
    log.email(
        LogLevel::Debug,
        Stage::Parse,
        &email.message_id,
        format!(
            "{} parser: {}",
            triage.parser.key(),
            match &triage.outcome.result {
                Ok(txn) => format!("confidence {:.2}", txn.confidence),
                Err(e) => e.to_string(),
            }
        ),
    );
    if !triage.needs_llm_fallback || oracle.is_none() {
        return triage.outcome;
    }

    let request = fallback_request(email);
    let mut outcomes = parse_batch(std::slice::from_ref(&request), oracle, config, log).await;
    let llm = outcomes
        .remove(&request.id)
        .unwrap_or_else(|| ParseOutcome::from_llm(Err(ParseFailure::LlmMissingId)));
    arbitrate(triage.outcome, llm)
}
