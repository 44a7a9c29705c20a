/// Quote a PostgreSQL identifier.
pub fn quote_pg_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a MySQL identifier.
pub fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// First usable unique key from `(index, column)` rows listed in preference
/// order. An index with an expression column (no name) is passed over.
pub fn pick_unique_key(rows: Vec<(String, Option<String>)>) -> Option<Vec<String>> {
    let mut groups: Vec<(String, Vec<Option<String>>)> = Vec::new();
    for (index, column) in rows {
        match groups.last_mut() {
            Some((name, columns)) if *name == index => columns.push(column),
            _ => groups.push((index, vec![column])),
        }
    }
    groups
        .into_iter()
        .find_map(|(_, columns)| columns.into_iter().collect::<Option<Vec<_>>>())
}

/// Comma separated, quoted column list for an ORDER BY.
pub fn order_by_columns(columns: &[String], quote: fn(&str) -> String) -> String {
    columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", ")
}

// Helper function to format bytes
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
