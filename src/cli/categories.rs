use comfy_table::{Cell, Table};

use crate::cli::open_db;
use crate::error::Result;
use crate::settings::load_settings;
use crate::store::list_categories;

pub fn list() -> Result<()> {
    let settings = load_settings();
    let conn = open_db(&settings)?;
    let categories = list_categories(&conn, &settings.user_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "", "Name", "Default"]);
    for cat in categories {
        table.add_row(vec![
            Cell::new(cat.id),
            Cell::new(cat.icon.unwrap_or_default()),
            Cell::new(cat.name),
            Cell::new(if cat.is_default { "yes" } else { "" }),
        ]);
    }
    println!("Categories\n{table}");
    Ok(())
}
