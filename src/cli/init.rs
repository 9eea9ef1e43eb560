use std::path::PathBuf;

use colored::Colorize;

use crate::db::{ensure_user, get_connection, init_db};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, shellexpand_path};
use crate::store::list_categories;

pub fn run(
    data_dir: Option<String>,
    mail_dir: Option<String>,
    email: Option<String>,
) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        let expanded = shellexpand_path(&dir);
        std::fs::create_dir_all(&expanded)?;
        settings.data_dir = shellexpand_path(&expanded);
    }
    if let Some(dir) = mail_dir {
        settings.mail_dir = Some(shellexpand_path(&dir));
    }
    if email.is_some() {
        settings.user_email = email;
    }

    let data_dir = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(settings.logs_dir())?;

    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    let created = ensure_user(&conn, &settings.user_id, settings.user_email.as_deref())?;
    save_settings(&settings)?;

    println!("Initialized bankmail at {}", data_dir.display());
    if created {
        let count = list_categories(&conn, &settings.user_id)?.len();
        println!("Seeded {count} default categories for user '{}'.", settings.user_id);
    }
    match &settings.mail_dir {
        Some(dir) => println!("Mailbox:  {dir}"),
        None => println!(
            "No mailbox configured. \
             Use `bankmail sync --source <dir>` or re-run init with --mail-dir."
        ),
    }
    if !settings.resolved_oracle().is_configured() {
        println!(
            "{}",
            "No API key found (BANKMAIL_API_KEY / OPENAI_API_KEY): \
             LLM fallback and categorization are off."
                .yellow()
        );
    }
    Ok(())
}
