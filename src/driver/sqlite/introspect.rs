use rusqlite::Connection;

use crate::error::PolyDbError;
use crate::schema::{ColumnDef, IndexKind, IndexSpec, SchemaSnapshot};
use crate::types::ColumnType;

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn table_names(conn: &Connection) -> Result<Vec<String>, PolyDbError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>, PolyDbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(index)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, Option<String>>("name"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns.into_iter().flatten().collect())
}

/// Columns, primary keys and indexes of every table, from `sqlite_master` and the
/// `table_info`/`index_list`/`index_info` pragmas.
pub(crate) fn introspect(conn: &Connection) -> Result<SchemaSnapshot, PolyDbError> {
    let mut snap = SchemaSnapshot::default();

    for table in table_names(conn)? {
        let lower = table.to_lowercase();
        let mut primary: Vec<(i64, String)> = Vec::new();
        {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&table)))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let cid: i64 = row.get("cid")?;
                let name: String = row.get("name")?;
                let data_type: String = row.get("type")?;
                let notnull: i64 = row.get("notnull")?;
                let pk: i64 = row.get("pk")?;

                let mut col = ColumnDef::new(name.clone()).with_type(ColumnType::parse(&data_type));
                col.data_type = Some(data_type);
                col.nullable = notnull == 0;
                col.position = u32::try_from(cid + 1).ok();
                col.primary = pk > 0;
                if pk > 0 {
                    primary.push((pk, name));
                }
                snap.insert_column(&lower, col);
            }
        }
        primary.sort();
        snap.keys
            .insert(lower.clone(), primary.into_iter().map(|(_, name)| name).collect());

        let indexes: Vec<(String, bool)> = {
            let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quote_ident(&table)))?;
            stmt.query_map([], |row| {
                Ok((row.get::<_, String>("name")?, row.get::<_, i64>("unique")? != 0))
            })?
            .collect::<Result<Vec<_>, _>>()?
        };
        for (name, unique) in indexes {
            let columns = index_columns(conn, &name)?;
            if let Some(cols) = snap.columns.get_mut(&lower) {
                if unique && columns.len() == 1 {
                    if let Some(col) = cols.get_mut(&columns[0]).filter(|c| !c.primary) {
                        col.unique = true;
                    }
                }
            }
            let kind = if unique { IndexKind::Unique } else { IndexKind::Index };
            snap.indexes
                .entry(lower.clone())
                .or_default()
                .push(IndexSpec::new(name, kind, columns));
        }
    }
    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_columns_keys_and_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE Users (id TEXT, ts INTEGER, email TEXT, PRIMARY KEY (id, ts));
             CREATE UNIQUE INDEX users_udx ON Users (email);",
        )
        .unwrap();
        let snap = introspect(&conn).unwrap();
        assert_eq!(snap.keys("users"), ["id".to_string(), "ts".to_string()]);
        assert_eq!(snap.column("users", "ts").unwrap().ty, ColumnType::Int);
        assert!(snap.column("users", "email").unwrap().unique);
        assert!(snap.indexes("users").iter().any(|ix| ix.name == "users_udx"));
    }
}
