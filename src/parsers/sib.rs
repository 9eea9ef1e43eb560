use std::sync::OnceLock;

use regex::Regex;

use super::{
    common_merchant_rules, detect_type, extract_reference, is_recent, run_cascade, MerchantRule,
    ParseInput,
};
use crate::extract::{extract_amount, extract_amount_with, extract_date};
use crate::models::{ParseFailure, ParseOutcome, ParsedTransaction, TxnType, UNKNOWN_MERCHANT};

const TYPE_KEYWORDS: &[(&str, TxnType)] = &[
    ("debited", TxnType::Debit),
    ("credited", TxnType::Credit),
    ("withdrawn", TxnType::Debit),
    ("deposited", TxnType::Credit),
    ("spent", TxnType::Debit),
    ("received", TxnType::Credit),
    ("paid", TxnType::Debit),
];

fn amount_patterns() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![Regex::new(
            r"(?i)\b(?:debited|credited|withdrawn|deposited)\s+(?:for|with|by)\s+(?:Rs\.?|INR|₹)\s*([0-9][0-9,]*(?:\.[0-9]{1,2})?)",
        )
        .expect("invalid sib amount regex")]
    })
}

fn merchant_rules() -> &'static [MerchantRule] {
    static RULES: OnceLock<Vec<MerchantRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = vec![
            // "towards UPI/512345678901/JOHN DOE/okaxis"
            MerchantRule::new(r"(?i)\bUPI/(\d{6,})/([^/\n.]+)", 2, Some((1, "UPI/"))),
            // "UPI ID john@okaxis (JOHN DOE)"
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
    let Some(txn_type) = detect_type(text, TYPE_KEYWORDS) else {
        return ParseOutcome::failed(ParseFailure::NoTransactionType);
    };
    let Some(amount) = extract_amount_with(text, amount_patterns()).or_else(|| extract_amount(text))
    else {
        return ParseOutcome::failed(ParseFailure::NoAmount);
    };

    let (merchant, cascade_ref) = run_cascade(text, merchant_rules());
    let reference = cascade_ref.or_else(|| extract_reference(text));
    let extracted_date = extract_date(text);

    let mut confidence: f64 = 0.5 + 0.2;
    if merchant != UNKNOWN_MERCHANT {
        confidence += 0.2;
    }
    if extracted_date.is_some_and(|d| is_recent(d, input.today)) {
        confidence += 0.1;
    }

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
