use std::fs;
use std::path::Path;

use assert_cmd::Command;
use chrono::Utc;
use predicates::prelude::*;

fn bankmail(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bankmail").unwrap();
    cmd.env("HOME", home)
        .env_remove("BANKMAIL_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .current_dir(home);
    cmd
}

fn write_alert(dir: &Path, name: &str, id: &str, merchant_part: &str) {
    let today = Utc::now().date_naive().format("%d-%m-%y");
    let raw = format!(
        "Message-ID: <{id}>\r\n\
         From: HDFC Bank InstaAlerts <alerts@hdfcbank.net>\r\n\
         Subject: You have done a UPI txn. Check details!\r\n\
         Date: {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\r\n\
         Dear Customer, Rs.169.00 has been debited from your account to {merchant_part} on {today}.\r\n",
        Utc::now().to_rfc2822()
    );
    fs::write(dir.join(name), raw).unwrap();
}

fn setup() -> (tempfile::TempDir, std::path::PathBuf) {
    let home = tempfile::tempdir().unwrap();
    let mail = home.path().join("mail");
    fs::create_dir_all(&mail).unwrap();
    write_alert(&mail, "zepto.eml", "zepto-1@hdfcbank.net", "VPA shop@ybl BIG BAZAAR");
    bankmail(home.path())
        .args(["init", "--mail-dir"])
        .arg(&mail)
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized bankmail"))
        .stdout(predicate::str::contains("Seeded 13 default categories"));
    (home, mail)
}

#[test]
fn help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    bankmail(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("transactions"));
}

#[test]
fn commands_require_init() {
    let home = tempfile::tempdir().unwrap();
    bankmail(home.path())
        .args(["transactions", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Run `bankmail init`"));
}

#[test]
fn sync_is_idempotent() {
    let (home, _mail) = setup();

    bankmail(home.path())
        .args(["sync", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"newTransactions\": 1"))
        .stdout(predicate::str::contains("\"success\": true"));

    bankmail(home.path())
        .args(["sync", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"newTransactions\": 0"))
        .stdout(predicate::str::contains("\"duplicates\": 1"));

    bankmail(home.path())
        .args(["transactions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BIG BAZAAR"))
        .stdout(predicate::str::contains("₹169.00"));

    bankmail(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Transactions:  1"));
}

#[test]
fn sync_missing_mailbox_fails() {
    let (home, _mail) = setup();
    bankmail(home.path())
        .args(["sync", "--source", "/no/such/mailbox"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error: Mail transport error"));
}

#[test]
fn parse_single_file() {
    let (home, mail) = setup();
    bankmail(home.path())
        .arg("parse")
        .arg(mail.join("zepto.eml"))
        .assert()
        .success()
        .stdout(predicate::str::contains("HDFC Bank"))
        .stdout(predicate::str::contains("₹169.00"))
        .stdout(predicate::str::contains("BIG BAZAAR"))
        .stdout(predicate::str::contains("regex"));
}

#[test]
fn categories_and_edit() {
    let (home, _mail) = setup();
    bankmail(home.path())
        .arg("categories")
        .assert()
        .success()
        .stdout(predicate::str::contains("Food & Dining"))
        .stdout(predicate::str::contains("Other"));

    bankmail(home.path())
        .args(["transactions", "edit", "missing-id"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to change"));

    bankmail(home.path())
        .args(["transactions", "edit", "missing-id", "--merchant", "Big Bazaar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown transaction"));

    bankmail(home.path())
        .args(["transactions", "edit", "missing-id", "--category", "Snacks"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown category: Snacks"));
}
