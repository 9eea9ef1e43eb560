use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::FALLBACK_CATEGORY;
use crate::error::{BankmailError, Result};
use crate::models::{Bank, Category, Transaction, TxnType};

const DATE_FMT: &str = "%Y-%m-%d";

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn date_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FMT).map_err(|e| conversion_error(idx, e))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

// ---------------------------------------------------------------------------
// Duplicate checks
// ---------------------------------------------------------------------------

pub fn message_exists(conn: &Connection, user_id: &str, message_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM transactions WHERE user_id = ?1 AND email_message_id = ?2",
            params![user_id, message_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn content_exists(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    raw_merchant: &str,
    date: NaiveDate,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM transactions \
             WHERE user_id = ?1 AND amount = ?2 AND raw_merchant = ?3 AND transaction_date = ?4 \
             LIMIT 1",
            params![user_id, amount, raw_merchant, date.format(DATE_FMT).to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn list_categories(conn: &Connection, user_id: &str) -> Result<Vec<Category>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, name, icon, is_default FROM categories \
         WHERE user_id = ?1 ORDER BY name",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok(Category {
                id: row.get(0)?,
                user_id: row.get(1)?,
                name: row.get(2)?,
                icon: row.get(3)?,
                is_default: row.get(4)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// Case-insensitive lookup by name or id.
pub fn find_category(conn: &Connection, user_id: &str, name_or_id: &str) -> Result<Category> {
    list_categories(conn, user_id)?
        .into_iter()
        .find(|c| c.id == name_or_id || c.name.eq_ignore_ascii_case(name_or_id))
        .ok_or_else(|| BankmailError::UnknownCategory(name_or_id.to_string()))
}

pub fn fallback_category(categories: &[Category]) -> Option<&Category> {
    categories.iter().find(|c| c.name == FALLBACK_CATEGORY)
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

pub fn insert_transaction(conn: &Connection, txn: &Transaction) -> Result<()> {
    conn.execute(
        "INSERT INTO transactions (id, user_id, amount, txn_type, merchant, raw_merchant, \
         category_id, subcategory, description, transaction_date, bank, reference, \
         email_message_id, raw_email_subject, confidence, used_llm, is_verified, created_at, \
         updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19)",
        params![
            txn.id,
            txn.user_id,
            txn.amount,
            txn.txn_type.as_str(),
            txn.merchant,
            txn.raw_merchant,
            txn.category_id,
            txn.subcategory,
            txn.description,
            txn.transaction_date.format(DATE_FMT).to_string(),
            txn.bank.key(),
            txn.reference,
            txn.email_message_id,
            txn.raw_email_subject,
            txn.confidence,
            txn.used_llm,
            txn.is_verified,
            txn.created_at.to_rfc3339(),
            txn.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

const TXN_COLUMNS: &str = "id, user_id, amount, txn_type, merchant, raw_merchant, category_id, \
     subcategory, description, transaction_date, bank, reference, email_message_id, \
     raw_email_subject, confidence, used_llm, is_verified, created_at, updated_at";

fn transaction_from_row(row: &Row) -> rusqlite::Result<Transaction> {
    let txn_type: String = row.get(3)?;
    let bank: String = row.get(10)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        amount: row.get(2)?,
        txn_type: TxnType::parse(&txn_type).unwrap_or(TxnType::Debit),
        merchant: row.get(4)?,
        raw_merchant: row.get(5)?,
        category_id: row.get(6)?,
        subcategory: row.get(7)?,
        description: row.get(8)?,
        transaction_date: date_at(row, 9)?,
        bank: Bank::from_key(&bank),
        reference: row.get(11)?,
        email_message_id: row.get(12)?,
        raw_email_subject: row.get::<_, Option<String>>(13)?.unwrap_or_default(),
        confidence: row.get(14)?,
        used_llm: row.get(15)?,
        is_verified: row.get(16)?,
        created_at: timestamp_at(row, 17)?,
        updated_at: timestamp_at(row, 18)?,
    })
}

/// Most recent first.
pub fn list_transactions(
    conn: &Connection,
    user_id: &str,
    limit: usize,
) -> Result<Vec<Transaction>> {
    let sql = format!(
        "SELECT {TXN_COLUMNS} FROM transactions WHERE user_id = ?1 \
         ORDER BY transaction_date DESC, created_at DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![user_id, limit as i64], transaction_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn get_transaction(conn: &Connection, user_id: &str, id: &str) -> Result<Transaction> {
    let sql = format!("SELECT {TXN_COLUMNS} FROM transactions WHERE user_id = ?1 AND id = ?2");
    conn.query_row(&sql, params![user_id, id], transaction_from_row)
        .optional()?
        .ok_or_else(|| BankmailError::UnknownTransaction(id.to_string()))
}

pub fn count_transactions(conn: &Connection, user_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT count(*) FROM transactions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Fields a user may change after a transaction is persisted. `None` leaves a field as is.
#[derive(Debug, Default, Clone)]
pub struct TransactionEdit {
    pub merchant: Option<String>,
    pub category_id: Option<String>,
    pub subcategory: Option<String>,
    pub description: Option<String>,
    pub is_verified: Option<bool>,
}

impl TransactionEdit {
    pub fn is_empty(&self) -> bool {
        self.merchant.is_none()
            && self.category_id.is_none()
            && self.subcategory.is_none()
            && self.description.is_none()
            && self.is_verified.is_none()
    }
}

pub fn update_transaction(
    conn: &Connection,
    user_id: &str,
    id: &str,
    edit: &TransactionEdit,
) -> Result<Transaction> {
    let current = get_transaction(conn, user_id, id)?;
    if edit.is_empty() {
        return Ok(current);
    }
    conn.execute(
        "UPDATE transactions SET merchant = ?1, category_id = ?2, subcategory = ?3, \
         description = ?4, is_verified = ?5, updated_at = ?6 WHERE user_id = ?7 AND id = ?8",
        params![
            edit.merchant.as_ref().unwrap_or(&current.merchant),
            edit.category_id.as_ref().or(current.category_id.as_ref()),
            edit.subcategory.as_ref().or(current.subcategory.as_ref()),
            edit.description.as_ref().or(current.description.as_ref()),
            edit.is_verified.unwrap_or(current.is_verified),
            Utc::now().to_rfc3339(),
            user_id,
            id,
        ],
    )?;
    get_transaction(conn, user_id, id)
}

// ---------------------------------------------------------------------------
// Sync watermark
// ---------------------------------------------------------------------------

pub fn last_sync_at(conn: &Connection, user_id: &str) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT last_sync_at FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(raw
        .flatten()
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

pub fn set_last_sync_at(conn: &Connection, user_id: &str, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE users SET last_sync_at = ?1 WHERE id = ?2",
        params![at.to_rfc3339(), user_id],
    )?;
    Ok(())
}
