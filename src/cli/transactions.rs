use std::collections::HashMap;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::{BankmailError, Result};
use crate::fmt::money;
use crate::models::TxnType;
use crate::settings::load_settings;
use crate::store::{
    find_category, list_categories, list_transactions, update_transaction, TransactionEdit,
};

pub fn list(limit: usize) -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let names: HashMap<String, String> = list_categories(&conn, &settings.user_id)?
        .into_iter()
        .map(|c| (c.id, c.name))
        .collect();
    let txns = list_transactions(&conn, &settings.user_id, limit)?;
    if txns.is_empty() {
        println!("No transactions yet. Run `bankmail sync` to import some.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ID", "Date", "Amount", "Merchant", "Category", "Bank", "Conf", "Source",
    ]);
    for t in txns {
        let amount = match t.txn_type {
            TxnType::Debit => format!("-{}", money(t.amount)).red().to_string(),
            TxnType::Credit => money(t.amount).green().to_string(),
        };
        let category = t
            .category_id
            .as_ref()
            .and_then(|id| names.get(id))
            .cloned()
            .unwrap_or_default();
        let category = match t.subcategory {
            Some(sub) => format!("{category} / {sub}"),
            None => category,
        };
        let merchant = if t.is_verified { format!("{} ✓", t.merchant) } else { t.merchant };
        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(t.transaction_date.format("%Y-%m-%d")),
            Cell::new(amount),
            Cell::new(merchant),
            Cell::new(category),
            Cell::new(t.bank.key()),
            Cell::new(format!("{:.2}", t.confidence)),
            Cell::new(if t.used_llm { "llm" } else { "regex" }),
        ]);
    }
    println!("Transactions\n{table}");
    Ok(())
}

pub fn edit(
    id: &str,
    merchant: Option<String>,
    category: Option<String>,
    subcategory: Option<String>,
    description: Option<String>,
    verified: Option<bool>,
) -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let category_id = match category {
        Some(name) => Some(find_category(&conn, &settings.user_id, &name)?.id),
        None => None,
    };
    let edit = TransactionEdit {
        merchant,
        category_id,
        subcategory,
        description,
        is_verified: verified,
    };
    if edit.is_empty() {
        return Err(BankmailError::Other(
            "Nothing to change. Pass at least one of \
             --merchant, --category, --subcategory, --description, --verified."
                .to_string(),
        ));
    }
    let txn = update_transaction(&conn, &settings.user_id, id, &edit)?;
    println!("Updated {}: {} {}", txn.id, txn.merchant, money(txn.amount));
    Ok(())
}
