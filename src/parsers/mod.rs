//! Deterministic per-bank parsers.

mod generic;
mod hdfc;
mod sib;

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::models::{Bank, ParseOutcome, TxnType, UNKNOWN_MERCHANT};
use crate::normalizer::normalize;

// ---------------------------------------------------------------------------
// Parser kinds: enum dispatch instead of trait objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParserKind {
    Hdfc,
    Sib,
    Generic,
}

const PARSERS_BY_BANK: &[(Bank, ParserKind)] = &[
    (Bank::Hdfc, ParserKind::Hdfc),
    (Bank::Sib, ParserKind::Sib),
];

pub fn for_bank(bank: Bank) -> ParserKind {
    PARSERS_BY_BANK
        .iter()
        .find(|(b, _)| *b == bank)
        .map(|(_, kind)| *kind)
        .unwrap_or(ParserKind::Generic)
}

impl ParserKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Hdfc => "hdfc",
            Self::Sib => "sib",
            Self::Generic => "generic",
        }
    }

    /// Parse one email body. The body may be HTML or plain text.
    pub fn parse(
        &self,
        body: &str,
        subject: &str,
        email_date: DateTime<Utc>,
        bank: Bank,
    ) -> ParseOutcome {
        let input = ParseInput {
            text: normalize(body),
            subject: subject.to_string(),
            email_date: email_date.date_naive(),
            today: Utc::now().date_naive(),
            bank,
        };
        self.parse_input(&input)
    }

    pub(crate) fn parse_input(&self, input: &ParseInput) -> ParseOutcome {
        match self {
            Self::Hdfc => hdfc::parse(input),
            Self::Sib => sib::parse(input),
            Self::Generic => generic::parse(input),
        }
    }
}

/// Normalized view of an email handed to a parser variant.
#[derive(Debug, Clone)]
pub(crate) struct ParseInput {
    pub text: String,
    pub subject: String,
    pub email_date: NaiveDate,
    pub today: NaiveDate,
    pub bank: Bank,
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// True when `keyword` occurs in `haystack` bounded by non-alphanumerics.
pub(crate) fn contains_word(haystack: &str, keyword: &str) -> bool {
    let hay = haystack.to_lowercase();
    let kw = keyword.to_lowercase();
    let mut start = 0;
    while let Some(pos) = hay[start..].find(&kw) {
        let begin = start + pos;
        let end = begin + kw.len();
        let before_ok = hay[..begin]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = hay[end..].chars().next().map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        start = end;
    }
    false
}

/// First keyword in list order that appears decides the type.
pub(crate) fn detect_type(text: &str, keywords: &[(&str, TxnType)]) -> Option<TxnType> {
    keywords
        .iter()
        .find(|(kw, _)| contains_word(text, kw))
        .map(|(_, t)| *t)
}

fn masked_account_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:\ba/?c\s*(?:no\.?\s*)?)?(?:\bx+\d{2,}\b|\*{2,}\d{2,}|\bx{4,}\b)")
            .expect("invalid masked account regex")
    })
}

fn honorific_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:mr|mrs|ms|miss|dr|shri|smt|sri)\.?\s+")
            .expect("invalid honorific regex")
    })
}

fn ws_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("invalid ws regex"))
}

const MAX_MERCHANT_CHARS: usize = 100;

pub fn normalize_merchant(raw: &str) -> String {
    let s = masked_account_re().replace_all(raw, " ");
    let s = s.replace(['<', '>', '*'], " ");
    let s = ws_re().replace_all(s.trim(), " ");
    let s = honorific_re().replace(&s, "");
    let s = s.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '-' | '(' | ')')
    });
    let truncated: String = s.chars().take(MAX_MERCHANT_CHARS).collect();
    let truncated = truncated.trim().to_string();
    if truncated.is_empty() {
        UNKNOWN_MERCHANT.to_string()
    } else {
        truncated
    }
}

fn date_like_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\d{1,4}[-/. ](?:\d{1,2}|[a-z]{3,9})[-/., ]+\d{2,4}$")
            .expect("invalid date-like regex")
    })
}

/// Captures that name the account holder's side, or a trailing clause, rather than a counterparty.
fn is_noise_merchant(candidate: &str) -> bool {
    const NOISE_WORDS: &[&str] = &[
        "your", "you", "a/c", "ac", "acct", "account", "card", "us", "me", "on", "via", "for",
        "using",
    ];
    let lower = candidate.to_lowercase();
    let first = lower.split_whitespace().next().unwrap_or("");
    lower.chars().count() < 2
        || NOISE_WORDS.contains(&first)
        || lower.starts_with("the bank")
        || lower.chars().all(|c| !c.is_alphabetic())
        || date_like_re().is_match(lower.trim())
}

/// One step of a merchant cascade.
pub(crate) struct MerchantRule {
    pub re: Regex,
    pub merchant_group: usize,
    /// Capture group holding a reference, and the prefix to put before it.
    pub reference: Option<(usize, &'static str)>,
}

impl MerchantRule {
    pub fn new(
        pattern: &str,
        merchant_group: usize,
        reference: Option<(usize, &'static str)>,
    ) -> Self {
        Self {
            re: Regex::new(pattern).expect("invalid merchant regex"),
            merchant_group,
            reference,
        }
    }
}

/// Run rules in order; the first rule yielding a real merchant ends the cascade.
/// Each rule rescans from just past a rejected match start, so a noisy capture
/// ("from your account to X") cannot swallow the real one.
pub(crate) fn run_cascade(text: &str, rules: &[MerchantRule]) -> (String, Option<String>) {
    for rule in rules {
        let mut start = 0;
        while start <= text.len() {
            let Some(caps) = rule.re.captures_at(text, start) else { break };
            let Some(whole) = caps.get(0) else { break };
            if let Some(raw) = caps.get(rule.merchant_group) {
                let merchant = normalize_merchant(raw.as_str());
                if merchant != UNKNOWN_MERCHANT && !is_noise_merchant(&merchant) {
                    let reference = rule.reference.and_then(|(group, prefix)| {
                        caps.get(group).map(|m| format!("{prefix}{}", m.as_str().trim()))
                    });
                    return (merchant, reference);
                }
            }
            start = whole.start()
                + text[whole.start()..].chars().next().map_or(1, char::len_utf8);
        }
    }
    (UNKNOWN_MERCHANT.to_string(), None)
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:UPI\s+Ref(?:erence)?|Ref(?:erence)?|Txn\s*ID|Transaction\s+ID)\s*(?:No\.?|Number|ID)?\s*(?:is)?\s*[:.#\-]?\s*([A-Z0-9]*\d[A-Z0-9]{5,})",
        )
        .expect("invalid reference regex")
    })
}

pub(crate) fn extract_reference(text: &str) -> Option<String> {
    reference_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

pub(crate) fn is_recent(date: NaiveDate, today: NaiveDate) -> bool {
    let age = (today - date).num_days();
    (-1..=365).contains(&age)
}

pub(crate) fn common_merchant_rules() -> Vec<MerchantRule> {
    vec![
        MerchantRule::new(
            r"(?i)\bInfo:?\s*(?:(?:UPI|IMPS|NEFT|POS)[-/ ]?(?:\d+[-/ ])?)?([^.\n]+)",
            1,
            None,
        ),
        MerchantRule::new(
            r"(?i)\btransferred\s+(?:to|from)\s+(.+?)(?:\s+on\s|\s+via\s|\.\s|\.$|\n|$)",
            1,
            None,
        ),
        MerchantRule::new(
            r"(?i)\b(?:to|from|at|by)\s+<?([A-Za-z0-9][A-Za-z0-9&.'\- ]{1,60}?)>?(?:\s+on\s|\s+via\s|\s+ref|\s+using\s|\s+for\s|\.\s|\.$|,|\n|$)",
            1,
            None,
        ),
    ]
}
