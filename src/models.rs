use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Merchant placeholder when no name could be extracted.
pub const UNKNOWN_MERCHANT: &str = "Unknown";

// ---------------------------------------------------------------------------
// Banks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bank {
    Hdfc,
    Sib,
    Icici,
    Sbi,
    Axis,
    Kotak,
    Unknown,
}

pub const ALL_BANKS: &[Bank] = &[
    Bank::Hdfc,
    Bank::Sib,
    Bank::Icici,
    Bank::Sbi,
    Bank::Axis,
    Bank::Kotak,
];

impl Bank {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Hdfc => "hdfc",
            Self::Sib => "sib",
            Self::Icici => "icici",
            Self::Sbi => "sbi",
            Self::Axis => "axis",
            Self::Kotak => "kotak",
            Self::Unknown => "unknown",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hdfc => "HDFC Bank",
            Self::Sib => "South Indian Bank",
            Self::Icici => "ICICI Bank",
            Self::Sbi => "State Bank of India",
            Self::Axis => "Axis Bank",
            Self::Kotak => "Kotak Mahindra Bank",
            Self::Unknown => "Unknown",
        }
    }

    /// Sender domains that identify this bank's alert mails.
    pub fn sender_domains(&self) -> &'static [&'static str] {
        match self {
            Self::Hdfc => &["hdfcbank.net", "hdfcbank.com", "hdfcbank.bank.in"],
            Self::Sib => &["southindianbank.com", "sib.co.in", "sib.bank.in"],
            Self::Icici => &["icicibank.com"],
            Self::Sbi => &["sbi.co.in"],
            Self::Axis => &["axisbank.com"],
            Self::Kotak => &["kotak.com"],
            Self::Unknown => &[],
        }
    }

    pub fn from_sender(sender: &str) -> Bank {
        let sender = sender.to_lowercase();
        ALL_BANKS
            .iter()
            .find(|bank| bank.sender_domains().iter().any(|d| sender.contains(d)))
            .copied()
            .unwrap_or(Bank::Unknown)
    }

    pub fn from_key(key: &str) -> Bank {
        ALL_BANKS
            .iter()
            .find(|b| b.key() == key)
            .copied()
            .unwrap_or(Bank::Unknown)
    }
}

// ---------------------------------------------------------------------------
// Emails and parse results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxnType {
    Debit,
    Credit,
}

impl TxnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    pub fn parse(raw: &str) -> Option<TxnType> {
        match raw.trim().to_lowercase().as_str() {
            "debit" | "dr" => Some(Self::Debit),
            "credit" | "cr" => Some(Self::Credit),
            _ => None,
        }
    }
}

/// A fetched notification email. Immutable once built.
#[derive(Debug, Clone)]
pub struct RawEmail {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub date: DateTime<Utc>,
    pub bank: Bank,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedTransaction {
    /// Whole minor currency units (paise).
    pub amount: i64,
    pub txn_type: TxnType,
    pub merchant: String,
    pub date: NaiveDate,
    pub reference: Option<String>,
    pub bank: Bank,
    pub confidence: f64,
}

impl ParsedTransaction {
    pub fn has_merchant(&self) -> bool {
        self.merchant != UNKNOWN_MERCHANT
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("Transaction was declined or failed")]
    Declined,

    #[error("Could not determine transaction type")]
    NoTransactionType,

    #[error("Could not extract amount")]
    NoAmount,

    #[error("LLM fallback not configured")]
    LlmNotConfigured,

    #[error("LLM reply missing amount, type or merchant")]
    LlmIncomplete,

    #[error("LLM batch failed: {0}")]
    LlmBatchFailed(String),

    #[error("LLM reply did not include this email")]
    LlmMissingId,
}

/// Result of running one parser over one email.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub result: std::result::Result<ParsedTransaction, ParseFailure>,
    pub used_llm: bool,
}

impl ParseOutcome {
    pub fn parsed(txn: ParsedTransaction) -> Self {
        Self { result: Ok(txn), used_llm: false }
    }

    pub fn failed(reason: ParseFailure) -> Self {
        Self { result: Err(reason), used_llm: false }
    }

    pub fn from_llm(result: std::result::Result<ParsedTransaction, ParseFailure>) -> Self {
        Self { result, used_llm: true }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn transaction(&self) -> Option<&ParsedTransaction> {
        self.result.as_ref().ok()
    }

    pub fn into_transaction(self) -> Option<ParsedTransaction> {
        self.result.ok()
    }
}

// ---------------------------------------------------------------------------
// Categories and persisted transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorizationResult {
    pub category_id: Option<String>,
    pub clean_merchant: String,
    pub subcategory: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub icon: Option<String>,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub txn_type: TxnType,
    pub merchant: String,
    pub raw_merchant: String,
    pub category_id: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub transaction_date: NaiveDate,
    pub bank: Bank,
    pub reference: Option<String>,
    pub email_message_id: String,
    pub raw_email_subject: String,
    pub confidence: f64,
    pub used_llm: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the row persisted for an accepted email.
    pub fn from_parts(
        user_id: &str,
        email: &RawEmail,
        parsed: &ParsedTransaction,
        category: &CategorizationResult,
        used_llm: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            amount: parsed.amount,
            txn_type: parsed.txn_type,
            merchant: category.clean_merchant.clone(),
            raw_merchant: parsed.merchant.clone(),
            category_id: category.category_id.clone(),
            subcategory: category.subcategory.clone(),
            description: None,
            transaction_date: parsed.date,
            bank: parsed.bank,
            reference: parsed.reference.clone(),
            email_message_id: email.message_id.clone(),
            raw_email_subject: email.subject.clone(),
            confidence: clamp_confidence(parsed.confidence.min(category.confidence)),
            used_llm,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Clamp a heuristic score into [0, 1]; NaN counts as no confidence.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_from_sender() {
        assert_eq!(Bank::from_sender("HDFC Bank <alerts@hdfcbank.net>"), Bank::Hdfc);
        assert_eq!(Bank::from_sender("sibalerts@sib.co.in"), Bank::Sib);
        assert_eq!(Bank::from_sender("noreply@icicibank.com"), Bank::Icici);
        assert_eq!(Bank::from_sender("friend@example.com"), Bank::Unknown);
    }

    #[test]
    fn test_txn_type_parse() {
        assert_eq!(TxnType::parse("Debit"), Some(TxnType::Debit));
        assert_eq!(TxnType::parse(" credit "), Some(TxnType::Credit));
        assert_eq!(TxnType::parse("transfer"), None);
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.4), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.55), 0.55);
    }

    #[test]
    fn test_transaction_takes_min_confidence() {
        let email = RawEmail {
            message_id: "m1".to_string(),
            sender: "alerts@hdfcbank.net".to_string(),
            subject: "Debit alert".to_string(),
            body: String::new(),
            date: Utc::now(),
            bank: Bank::Hdfc,
        };
        let parsed = ParsedTransaction {
            amount: 16900,
            txn_type: TxnType::Debit,
            merchant: "ZEPTO".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 1, 4).unwrap(),
            reference: None,
            bank: Bank::Hdfc,
            confidence: 0.9,
        };
        let category = CategorizationResult {
            category_id: Some("c1".to_string()),
            clean_merchant: "Zepto".to_string(),
            subcategory: None,
            confidence: 0.6,
        };
        let txn = Transaction::from_parts("u1", &email, &parsed, &category, false);
        assert_eq!(txn.confidence, 0.6);
        assert_eq!(txn.merchant, "Zepto");
        assert_eq!(txn.raw_merchant, "ZEPTO");
        assert_eq!(txn.email_message_id, "m1");
        assert!(!txn.is_verified);
    }
}
