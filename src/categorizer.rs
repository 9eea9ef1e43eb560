use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{clamp_confidence, CategorizationResult, Category, TxnType};
use crate::oracle::{complete_with_timeout, decode_reply, CompletionOracle};
use crate::settings::PipelineConfig;
use crate::store::fallback_category;
use crate::sync_log::{Stage, SyncLog};

/// Confidence given when no oracle answer is available.
pub const DEFAULT_CONFIDENCE: f64 = 0.3;
/// Ceiling for answers whose category had to be replaced.
pub const COERCED_CONFIDENCE_CAP: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct CategorizeRequest {
    pub id: String,
    pub merchant: String,
    pub amount: i64,
    pub txn_type: TxnType,
}

const SYSTEM_PROMPT: &str = "You categorize personal bank transactions. \
Reply with a single JSON object of the form \
{\"results\": [{\"id\": string, \"category_id\": string, \"merchant\": string, \
\"subcategory\": string|null, \"confidence\": number}]}. \
category_id must be one of the ids listed. merchant is the cleaned business name only, \
without the subcategory. confidence is between 0 and 1.";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategorizeReply {
    Wrapped { results: Vec<CategoryRecord> },
    Bare(Vec<CategoryRecord>),
}

#[derive(Debug, Deserialize)]
struct CategoryRecord {
    #[serde(default)]
    id: Value,
    #[serde(default, alias = "categoryId", alias = "category")]
    category_id: Option<String>,
    #[serde(default, alias = "cleanMerchant", alias = "clean_merchant")]
    merchant: Option<String>,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// "Other" (or uncategorized), merchant untouched, low confidence.
pub fn safe_default(categories: &[Category], merchant: &str) -> CategorizationResult {
    CategorizationResult {
        category_id: fallback_category(categories).map(|c| c.id.clone()),
        clean_merchant: merchant.to_string(),
        subcategory: None,
        confidence: DEFAULT_CONFIDENCE,
    }
}

fn build_prompt(batch: &[CategorizeRequest], categories: &[Category]) -> String {
    let mut prompt = String::from("Categories (id:name):\n");
    for cat in categories {
        prompt.push_str(&format!("{}:{}\n", cat.id, cat.name));
    }
    prompt.push_str("\nTransactions:\n");
    for req in batch {
        prompt.push_str(&format!(
            "id={} | merchant={} | amount={:.2} | type={}\n",
            req.id,
            req.merchant,
            req.amount as f64 / 100.0,
            req.txn_type.as_str(),
        ));
    }
    prompt
}

fn validate(
    record: &CategoryRecord,
    req: &CategorizeRequest,
    categories: &[Category],
    known_ids: &HashSet<&str>,
) -> CategorizationResult {
    let mut confidence = clamp_confidence(record.confidence.unwrap_or(COERCED_CONFIDENCE_CAP));
    let category_id = match record.category_id.as_deref().map(str::trim) {
        Some(id) if known_ids.contains(id) => Some(id.to_string()),
        _ => {
            confidence = confidence.min(COERCED_CONFIDENCE_CAP);
            fallback_category(categories).map(|c| c.id.clone())
        }
    };
    let clean_merchant = record
        .merchant
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(&req.merchant)
        .to_string();
    let subcategory = record
        .subcategory
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    CategorizationResult {
        category_id,
        clean_merchant,
        subcategory,
        confidence,
    }
}

/// Categorize every request, one oracle call per batch. Never fails: anything the
/// oracle cannot answer gets `safe_default`.
pub async fn categorize_batch(
    requests: &[CategorizeRequest],
    categories: &[Category],
    oracle: Option<&dyn CompletionOracle>,
    config: &PipelineConfig,
    log: &mut SyncLog,
) -> HashMap<String, CategorizationResult> {
    let mut results: HashMap<String, CategorizationResult> = requests
        .iter()
        .map(|r| (r.id.clone(), safe_default(categories, &r.merchant)))
        .collect();

    let Some(oracle) = oracle else {
        if !requests.is_empty() {
            log.info(Stage::Categorize, "oracle not configured; using default category");
        }
        return results;
    };
    if requests.is_empty() {
        return results;
    }

    let known_ids: HashSet<&str> = categories.iter().map(|c| c.id.as_str()).collect();
    let batch_size = config.categorize_batch_size.max(1);
    let batch_count = requests.len().div_ceil(batch_size);

    for (index, batch) in requests.chunks(batch_size).enumerate() {
        let batch_no = index + 1;
        let started = Instant::now();
        let prompt = build_prompt(batch, categories);

        let reply =
            complete_with_timeout(oracle, SYSTEM_PROMPT, &prompt, config.oracle_timeout_secs)
                .await
                .and_then(|raw| decode_reply::<CategorizeReply>(&raw).map_err(Into::into));
        let records = match reply {
            Ok(CategorizeReply::Wrapped { results }) => results,
            Ok(CategorizeReply::Bare(records)) => records,
            Err(e) => {
                log.warn(
                    Stage::Categorize,
                    format!("batch {batch_no}/{batch_count} failed, using defaults: {e}"),
                );
                continue;
            }
        };

        let by_id: HashMap<String, &CategoryRecord> = records
            .iter()
            .filter_map(|r| match &r.id {
                Value::String(s) => Some((s.trim().to_string(), r)),
                Value::Number(n) => Some((n.to_string(), r)),
                _ => None,
            })
            .collect();

        let mut answered = 0;
        for req in batch {
            if let Some(record) = by_id.get(&req.id) {
                results.insert(req.id.clone(), validate(record, req, categories, &known_ids));
                answered += 1;
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(batch = batch_no, batch_size = batch.len(), duration_ms, "categorize batch done");
        log.info(
            Stage::Categorize,
            format!("batch {batch_no}/{batch_count}: {answered}/{} categorized", batch.len()),
        );
    }
    results
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::oracle::testing::ScriptedOracle;

    fn catalog() -> Vec<Category> {
        ["Groceries", "Transport", "Other"]
            .iter()
            .enumerate()
            .map(|(i, name)| Category {
                id: format!("c{i}"),
                user_id: "u1".to_string(),
                name: name.to_string(),
                icon: None,
                is_default: true,
            })
            .collect()
    }

    fn request(id: &str, merchant: &str) -> CategorizeRequest {
        CategorizeRequest {
            id: id.to_string(),
            merchant: merchant.to_string(),
            amount: 16900,
            txn_type: TxnType::Debit,
        }
    }

    fn config(batch: usize) -> PipelineConfig {
        PipelineConfig { categorize_batch_size: batch, ..PipelineConfig::default() }
    }

    #[tokio::test]
    async fn test_no_oracle_gives_safe_default() {
        let mut log = SyncLog::new();
        let requests = [request("a", "ZEPTO")];
        let out = categorize_batch(&requests, &catalog(), None, &config(100), &mut log).await;
        let a = &out["a"];
        assert_eq!(a.category_id.as_deref(), Some("c2"));
        assert_eq!(a.clean_merchant, "ZEPTO");
        assert_eq!(a.subcategory, None);
        assert_eq!(a.confidence, DEFAULT_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_default_is_uncategorized_without_other() {
        let cats: Vec<Category> = catalog().into_iter().filter(|c| c.name != "Other").collect();
        let mut log = SyncLog::new();
        let out = categorize_batch(&[request("a", "X")], &cats, None, &config(100), &mut log).await;
        assert_eq!(out["a"].category_id, None);
    }

    #[tokio::test]
    async fn test_valid_and_invalid_categories() {
        let oracle = ScriptedOracle::ok(vec![json!({"results": [
            {"id": "a", "category_id": "c0", "merchant": "Zepto",
             "subcategory": "Quick commerce", "confidence": 0.92},
            {"id": "b", "category_id": "c99", "merchant": "Uber", "confidence": 0.95},
            {"id": "c", "category_id": "c1", "merchant": "", "confidence": 1.7},
        ]})]);
        let requests = vec![
            request("a", "ZEPTO MARKETPLACE"),
            request("b", "UBER INDIA"),
            request("c", "OLA"),
        ];
        let mut log = SyncLog::new();
        let out =
            categorize_batch(&requests, &catalog(), Some(&oracle), &config(100), &mut log).await;

        assert_eq!(out["a"].category_id.as_deref(), Some("c0"));
        assert_eq!(out["a"].clean_merchant, "Zepto");
        assert_eq!(out["a"].subcategory.as_deref(), Some("Quick commerce"));
        assert_eq!(out["a"].confidence, 0.92);

        assert_eq!(out["b"].category_id.as_deref(), Some("c2"));
        assert_eq!(out["b"].confidence, COERCED_CONFIDENCE_CAP);

        assert_eq!(out["c"].clean_merchant, "OLA");
        assert_eq!(out["c"].confidence, 1.0);
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_ids_and_failed_batches_are_isolated() {
        let oracle = ScriptedOracle::new(vec![
            Ok(json!([{"id": "1", "category_id": "c0", "merchant": "One", "confidence": 0.9}])
                .to_string()),
            Err("timeout".to_string()),
            Ok(json!({"results": [
                {"id": "5", "category_id": "c1", "merchant": "Five", "confidence": 0.8}
            ]})
            .to_string()),
        ]);
        let requests: Vec<_> = (1..=5).map(|i| request(&i.to_string(), "RAW")).collect();
        let mut log = SyncLog::new();
        let out =
            categorize_batch(&requests, &catalog(), Some(&oracle), &config(2), &mut log).await;

        assert_eq!(out.len(), 5);
        assert_eq!(out["1"].clean_merchant, "One");
        assert_eq!(out["2"].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(out["3"].confidence, DEFAULT_CONFIDENCE);
        assert_eq!(out["4"].category_id.as_deref(), Some("c2"));
        assert_eq!(out["5"].category_id.as_deref(), Some("c1"));
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn test_prompt_lists_catalog_pairs() {
        let oracle = ScriptedOracle::ok(vec![json!({"results": []})]);
        let mut log = SyncLog::new();
        let requests = [request("a", "ZEPTO")];
        categorize_batch(&requests, &catalog(), Some(&oracle), &config(100), &mut log).await;
        let prompt = &oracle.prompts()[0];
        assert!(prompt.contains("c0:Groceries"));
        assert!(prompt.contains("id=a | merchant=ZEPTO | amount=169.00 | type=debit"));
    }
}
