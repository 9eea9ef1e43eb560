use std::sync::OnceLock;

use super::{
    common_merchant_rules, detect_type, extract_reference, is_recent, run_cascade, MerchantRule,
    ParseInput,
};
use crate::extract::{extract_amount, extract_date};
use crate::models::{ParseFailure, ParseOutcome, ParsedTransaction, TxnType, UNKNOWN_MERCHANT};

const TYPE_KEYWORDS: &[(&str, TxnType)] = &[
    ("debited", TxnType::Debit),
    ("credited", TxnType::Credit),
    ("spent", TxnType::Debit),
    ("withdrawn", TxnType::Debit),
    ("purchase", TxnType::Debit),
    ("paid", TxnType::Debit),
    ("received", TxnType::Credit),
    ("deposited", TxnType::Credit),
    ("refund", TxnType::Credit),
    ("debit", TxnType::Debit),
    ("credit", TxnType::Credit),
];

/// Each one found in the body adds a little confidence.
const BANKING_KEYWORDS: &[&str] = &[
    "account", "a/c", "transaction", "upi", "imps", "neft", "rtgs", "card", "balance", "bank",
];

fn merchant_rules() -> &'static [MerchantRule] {
    static RULES: OnceLock<Vec<MerchantRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = vec![
            MerchantRule::new(
                r"(?i)\b(?:merchant|payee|beneficiary)(?:\s+name)?\s*[:\-]\s*([^\n.,]+)",
                1,
                None,
            ),
            MerchantRule::new(
                r"(?i)\b(?:VPA|UPI\s+ID)\s+([a-z0-9._\-]+@[a-z0-9.\-]+)\s*\(([^)]+)\)",
                2,
                Some((1, "UPI/")),
            ),
        ];
        rules.extend(common_merchant_rules());
        rules
    })
}

pub(super) fn parse(input: &ParseInput) -> ParseOutcome {
    let text = input.text.as_str();
    let with_subject = format!("{text} {}", input.subject);
    let Some(txn_type) = detect_type(&with_subject, TYPE_KEYWORDS) else {
        return ParseOutcome::failed(ParseFailure::NoTransactionType);
    };
    let Some(amount) = extract_amount(text) else {
        return ParseOutcome::failed(ParseFailure::NoAmount);
    };

    let (merchant, cascade_ref) = run_cascade(text, merchant_rules());
    let reference = cascade_ref.or_else(|| extract_reference(text));
    let extracted_date = extract_date(text);

    let mut confidence: f64 = 0.4 + 0.15;
    if merchant != UNKNOWN_MERCHANT && merchant.chars().count() > 3 {
        confidence += 0.2;
    }
    if extracted_date.is_some_and(|d| is_recent(d, input.today)) {
        confidence += 0.1;
    }
    let lower = text.to_lowercase();
    let hits = BANKING_KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    confidence += 0.05 * hits as f64;

    ParseOutcome::parsed(ParsedTransaction {
        amount,
        txn_type,
        merchant,
        date: extracted_date.unwrap_or(input.email_date),
        reference,
        bank: input.bank,
        confidence: confidence.min(1.0),
    })
}
