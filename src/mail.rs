//! Mail retrieval: query construction, body decoding and a local `.eml` transport.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use sha2::{Digest, Sha256};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{BankmailError, Result};
use crate::models::{Bank, RawEmail, ALL_BANKS};
use crate::settings::PipelineConfig;

/// Subject words that mark an alert even from an unlisted sender.
pub const SUBJECT_KEYWORDS: &[&str] = &[
    "debited",
    "credited",
    "transaction alert",
    "upi",
    "spent",
    "payment received",
    "account update",
];

const SNIPPET_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Incremental,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    NewerThanDays(u32),
    NewerThanMonths(u32),
    After(NaiveDate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailQuery {
    pub senders: Vec<String>,
    pub subject_keywords: Vec<String>,
    pub bound: DateBound,
}

impl MailQuery {
    /// Full backfill ignores the watermark; incremental runs start from it when present.
    pub fn build(
        mode: SyncMode,
        watermark: Option<DateTime<Utc>>,
        config: &PipelineConfig,
    ) -> Self {
        let bound = match (mode, watermark) {
            (SyncMode::Full, _) => DateBound::NewerThanMonths(config.backfill_months),
            (SyncMode::Incremental, Some(at)) => DateBound::After(at.date_naive()),
            (SyncMode::Incremental, None) => DateBound::NewerThanDays(config.incremental_days),
        };
        Self {
            senders: ALL_BANKS
                .iter()
                .flat_map(|b| b.sender_domains().iter().map(|d| d.to_string()))
                .collect(),
            subject_keywords: SUBJECT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            bound,
        }
    }

    /// Gmail search syntax for the same query.
    pub fn to_search_string(&self) -> String {
        let clauses: Vec<String> = self
            .senders
            .iter()
            .map(|s| format!("from:{s}"))
            .chain(self.subject_keywords.iter().map(|k| {
                if k.contains(' ') {
                    format!("subject:\"{k}\"")
                } else {
                    format!("subject:{k}")
                }
            }))
            .collect();
        let bound = match self.bound {
            DateBound::NewerThanDays(d) => format!("newer_than:{d}d"),
            DateBound::NewerThanMonths(m) => format!("newer_than:{m}m"),
            DateBound::After(date) => format!("after:{}", date.format("%Y/%m/%d")),
        };
        format!("({}) {bound}", clauses.join(" OR "))
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.bound {
            DateBound::NewerThanDays(d) => now - Duration::days(i64::from(d)),
            DateBound::NewerThanMonths(m) => now
                .checked_sub_months(Months::new(m))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            DateBound::After(date) => date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }

    /// (sender allow-list OR subject keyword) AND date lower bound.
    pub fn matches(
        &self,
        sender: &str,
        subject: &str,
        date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        let sender = sender.to_lowercase();
        let subject = subject.to_lowercase();
        let wanted = self.senders.iter().any(|s| sender.contains(&s.to_lowercase()))
            || self.subject_keywords.iter().any(|k| subject.contains(&k.to_lowercase()));
        wanted && date >= self.cutoff(now)
    }
}

// ---------------------------------------------------------------------------
// Messages and transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub id: String,
    pub sender: String,
    pub subject: String,
    /// Decoded body: plain text preferred, HTML otherwise.
    pub raw_body: String,
    pub headers: Vec<(String, String)>,
    pub internal_date: DateTime<Utc>,
}

const RELAY_HEADERS: &[&str] = &["sender", "reply-to", "return-path"];

impl FetchedMessage {
    /// Bank from the From address, else from relay headers (forwarded alerts).
    pub fn bank(&self) -> Bank {
        let from = Bank::from_sender(&self.sender);
        if from != Bank::Unknown {
            return from;
        }
        self.headers
            .iter()
            .filter(|(key, _)| RELAY_HEADERS.iter().any(|h| key.eq_ignore_ascii_case(h)))
            .map(|(_, value)| Bank::from_sender(value))
            .find(|bank| *bank != Bank::Unknown)
            .unwrap_or(Bank::Unknown)
    }

    pub fn into_raw_email(self) -> RawEmail {
        RawEmail {
            bank: self.bank(),
            message_id: self.id,
            sender: self.sender,
            subject: self.subject,
            body: self.raw_body,
            date: self.internal_date,
        }
    }
}

#[derive(Debug, Default)]
pub struct MessagePage {
    pub messages: Vec<FetchedMessage>,
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn fetch_page(
        &self,
        query: &MailQuery,
        page_token: Option<String>,
    ) -> Result<MessagePage>;

    async fn fetch_all(&self, query: &MailQuery) -> Result<Vec<FetchedMessage>> {
        let mut all = Vec::new();
        let mut token = None;
        loop {
            let page = self.fetch_page(query, token).await?;
            all.extend(page.messages);
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// Body decoding
// ---------------------------------------------------------------------------

fn find_leaf(mail: &ParsedMail, accept: &dyn Fn(&str) -> bool) -> Option<String> {
    if mail.subparts.is_empty() {
        let mime = mail.ctype.mimetype.to_ascii_lowercase();
        if accept(&mime) {
            return mail.get_body().ok().filter(|b| !b.trim().is_empty());
        }
        return None;
    }
    mail.subparts.iter().find_map(|part| find_leaf(part, accept))
}

fn snippet(text: &str) -> String {
    text.trim().chars().take(SNIPPET_CHARS).collect()
}

/// text/plain, then text/html, then any other text part, then a short snippet.
pub fn decode_body(mail: &ParsedMail, raw: &[u8]) -> String {
    find_leaf(mail, &|m| m == "text/plain")
        .or_else(|| find_leaf(mail, &|m| m == "text/html"))
        .or_else(|| find_leaf(mail, &|m| m.starts_with("text/")))
        .unwrap_or_else(|| match mail.get_body() {
            Ok(body) if !body.trim().is_empty() => snippet(&body),
            _ => snippet(&String::from_utf8_lossy(raw)),
        })
}

pub fn parse_eml(raw: &[u8]) -> Result<FetchedMessage> {
    let mail = parse_mail(raw)?;
    let headers: Vec<(String, String)> = mail
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect();

    let id = mail
        .headers
        .get_first_value("Message-ID")
        .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>').to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| hex::encode(Sha256::digest(raw)));

    let internal_date = mail
        .headers
        .get_first_value("Date")
        .and_then(|d| mailparse::dateparse(&d).ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);

    Ok(FetchedMessage {
        id,
        sender: mail.headers.get_first_value("From").unwrap_or_default(),
        subject: mail.headers.get_first_value("Subject").unwrap_or_default(),
        raw_body: decode_body(&mail, raw),
        headers,
        internal_date,
    })
}

// ---------------------------------------------------------------------------
// Local mailbox: a directory tree of .eml files
// ---------------------------------------------------------------------------

pub struct EmlDirectory {
    root: PathBuf,
    page_size: usize,
}

impl EmlDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), page_size: 50 }
    }

    fn check_root(&self) -> Result<()> {
        match fs::read_dir(&self.root) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => Err(
                BankmailError::Unauthorized(format!("cannot read mailbox {}", self.root.display())),
            ),
            Err(e) => Err(BankmailError::Transport(format!(
                "mailbox {} unavailable: {e}",
                self.root.display()
            ))),
        }
    }

    fn eml_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_eml(p))
            .collect();
        files.sort();
        files
    }
}

fn is_eml(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("eml"))
        .unwrap_or(false)
}

#[async_trait]
impl MailTransport for EmlDirectory {
    async fn fetch_page(
        &self,
        query: &MailQuery,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        self.check_root()?;
        let now = Utc::now();
        let mut matching = Vec::new();
        for path in self.eml_files() {
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(path = %path.display(), "skipping unreadable message: {e}");
                    continue;
                }
            };
            match parse_eml(&raw) {
                Ok(msg) if query.matches(&msg.sender, &msg.subject, msg.internal_date, now) => {
                    matching.push(msg)
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), "skipping malformed message: {e}"),
            }
        }

        let offset: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (offset + self.page_size).min(matching.len());
        let next_page_token = (end < matching.len()).then(|| end.to_string());
        let messages = if offset < matching.len() {
            matching.drain(offset..end).collect()
        } else {
            Vec::new()
        };
        Ok(MessagePage { messages, next_page_token })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content.replace('\n', "\r\n")).unwrap();
    }

    fn rfc2822(dt: DateTime<Utc>) -> String {
        dt.to_rfc2822()
    }

    fn plain_eml(id: &str, from: &str, subject: &str, date: DateTime<Utc>, body: &str) -> String {
        format!(
            "Message-ID: <{id}>\nFrom: {from}\nSubject: {subject}\nDate: {}\n\
             Content-Type: text/plain; charset=utf-8\n\n{body}\n",
            rfc2822(date)
        )
    }

    #[test]
    fn test_query_strings() {
        let config = PipelineConfig::default();
        let q = MailQuery::build(SyncMode::Incremental, None, &config);
        let s = q.to_search_string();
        assert!(s.starts_with("(from:hdfcbank.net OR "));
        assert!(s.contains("subject:debited"));
        assert!(s.contains("subject:\"transaction alert\""));
        assert!(s.ends_with(") newer_than:7d"));

        assert!(MailQuery::build(SyncMode::Full, None, &config)
            .to_search_string()
            .ends_with("newer_than:6m"));

        let watermark = Utc.with_ymd_and_hms(2025, 1, 31, 18, 0, 0).unwrap();
        assert!(MailQuery::build(SyncMode::Incremental, Some(watermark), &config)
            .to_search_string()
            .ends_with("after:2025/01/31"));
        assert!(MailQuery::build(SyncMode::Full, Some(watermark), &config)
            .to_search_string()
            .ends_with("newer_than:6m"));
    }

    #[test]
    fn test_query_matching() {
        let config = PipelineConfig::default();
        let now = Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap();
        let q = MailQuery::build(SyncMode::Incremental, None, &config);
        let recent = now - Duration::days(2);
        assert!(q.matches("HDFC <alerts@hdfcbank.net>", "View: Account update", recent, now));
        assert!(q.matches("noreply@newbank.com", "Rs.500 debited from your account", recent, now));
        assert!(!q.matches("friend@example.com", "Lunch?", recent, now));
        assert!(!q.matches("alerts@hdfcbank.net", "Alert", now - Duration::days(30), now));

        let watermark = Some(now - Duration::days(40));
        let after = MailQuery::build(SyncMode::Incremental, watermark, &config);
        assert!(after.matches("alerts@hdfcbank.net", "Alert", now - Duration::days(30), now));
    }

    #[test]
    fn test_parse_plain_message() {
        let date = Utc.with_ymd_and_hms(2025, 1, 5, 10, 30, 0).unwrap();
        let from = "alerts@hdfcbank.net";
        let raw = plain_eml("abc@hdfcbank.net", from, "Debit alert", date, "Rs.100 debited")
            .replace('\n', "\r\n");
        let msg = parse_eml(raw.as_bytes()).unwrap();
        assert_eq!(msg.id, "abc@hdfcbank.net");
        assert_eq!(msg.subject, "Debit alert");
        assert_eq!(msg.internal_date, date);
        assert_eq!(msg.raw_body.trim(), "Rs.100 debited");
        assert!(msg.headers.iter().any(|(k, _)| k == "Subject"));
        assert_eq!(msg.into_raw_email().bank, Bank::Hdfc);
    }

    #[test]
    fn test_forwarded_alert_keeps_bank_from_relay_headers() {
        let raw = "From: me@gmail.com\r\nReply-To: HDFC Bank <alerts@hdfcbank.net>\r\n\
                   Subject: Fwd: alert\r\n\r\nRs.10 debited\r\n";
        let msg = parse_eml(raw.as_bytes()).unwrap();
        assert_eq!(msg.bank(), Bank::Hdfc);

        let raw = "From: me@gmail.com\r\nSubject: hello\r\n\r\nhi\r\n";
        assert_eq!(parse_eml(raw.as_bytes()).unwrap().into_raw_email().bank, Bank::Unknown);
    }

    #[test]
    fn test_missing_message_id_uses_content_hash() {
        let raw = "From: a@b.com\r\nSubject: hi\r\n\r\nbody\r\n";
        let first = parse_eml(raw.as_bytes()).unwrap();
        let second = parse_eml(raw.as_bytes()).unwrap();
        assert_eq!(first.id.len(), 64);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_body_prefers_plain_then_html() {
        let alternative = "From: a@b.com\r\nSubject: x\r\nMIME-Version: 1.0\r\n\
            Content-Type: multipart/alternative; boundary=\"XX\"\r\n\r\n\
            --XX\r\nContent-Type: text/html\r\n\r\n<p>html version</p>\r\n\
            --XX\r\nContent-Type: text/plain\r\n\r\nplain version\r\n--XX--\r\n";
        let msg = parse_eml(alternative.as_bytes()).unwrap();
        assert_eq!(msg.raw_body.trim(), "plain version");

        let html_only = "From: a@b.com\r\nSubject: x\r\nMIME-Version: 1.0\r\n\
            Content-Type: multipart/mixed; boundary=\"OUT\"\r\n\r\n\
            --OUT\r\nContent-Type: multipart/related; boundary=\"IN\"\r\n\r\n\
            --IN\r\nContent-Type: text/html\r\n\r\n<p>nested html</p>\r\n--IN--\r\n\
            --OUT\r\nContent-Type: image/png\r\n\r\nabc\r\n--OUT--\r\n";
        let msg = parse_eml(html_only.as_bytes()).unwrap();
        assert_eq!(msg.raw_body.trim(), "<p>nested html</p>");
    }

    #[tokio::test]
    async fn test_eml_directory_filters_and_pages() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("inbox");
        fs::create_dir_all(&nested).unwrap();
        let now = Utc::now();
        for i in 0..3 {
            let (id, date) = (format!("m{i}"), now - Duration::hours(i));
            let eml = plain_eml(&id, "alerts@hdfcbank.net", "Alert", date, "Rs.1 debited");
            write(&nested, &format!("alert{i}.eml"), &eml);
        }
        write(dir.path(), "spam.eml", &plain_eml("s1", "promo@shop.com", "Sale!", now, "50% off"));
        write(dir.path(), "notes.txt", "not an email");

        let transport = EmlDirectory { root: dir.path().to_path_buf(), page_size: 2 };
        let query = MailQuery::build(SyncMode::Incremental, None, &PipelineConfig::default());
        let first = transport.fetch_page(&query, None).await.unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.next_page_token.as_deref(), Some("2"));

        let all = transport.fetch_all(&query).await.unwrap();
        let mut ids: Vec<String> = all.into_iter().map(|m| m.id).collect();
        ids.sort();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_missing_mailbox_is_fatal() {
        let transport = EmlDirectory::new("/definitely/not/here");
        let query = MailQuery::build(SyncMode::Full, None, &PipelineConfig::default());
        assert!(matches!(
            transport.fetch_all(&query).await,
            Err(BankmailError::Transport(_))
        ));
    }
}
