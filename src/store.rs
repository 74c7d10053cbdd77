use rusqlite::{Connection, OptionalExtension};

/// Generic keyed collection store.
///
/// The browser edition persisted every residual UI collection as a JSON
/// array under a string key with unguarded overwrite. The daemon keeps the
/// key -> array contract but adds a version stamp per key so callers can
/// detect lost-update races instead of silently winning them.
#[derive(Debug, Clone)]
pub struct LoadedCollection {
    pub items: Vec<serde_json::Value>,
    pub version: i64,
}

#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Saved { version: i64 },
    Conflict { expected: i64, actual: i64 },
}

/// Missing key loads as an empty collection at version 0. A payload that is
/// not a JSON array degrades to an empty item list; the stored version is
/// still reported so a subsequent guarded save can replace it.
pub fn load_collection(conn: &Connection, key: &str) -> anyhow::Result<LoadedCollection> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT payload, version FROM collections WHERE key = ?",
            [key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    let Some((payload, version)) = row else {
        return Ok(LoadedCollection {
            items: Vec::new(),
            version: 0,
        });
    };

    let items = match serde_json::from_str::<serde_json::Value>(&payload) {
        Ok(serde_json::Value::Array(items)) => items,
        _ => Vec::new(),
    };

    Ok(LoadedCollection { items, version })
}

pub fn save_collection(
    conn: &Connection,
    key: &str,
    items: &[serde_json::Value],
    expected_version: Option<i64>,
) -> anyhow::Result<SaveOutcome> {
    let actual: i64 = conn
        .query_row("SELECT version FROM collections WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?
        .unwrap_or(0);

    if let Some(expected) = expected_version {
        if expected != actual {
            return Ok(SaveOutcome::Conflict { expected, actual });
        }
    }

    let payload = serde_json::to_string(&serde_json::Value::Array(items.to_vec()))?;
    let next = actual + 1;
    conn.execute(
        "INSERT INTO collections(key, payload, version)
         VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           payload = excluded.payload,
           version = excluded.version",
        (key, &payload, next),
    )?;

    Ok(SaveOutcome::Saved { version: next })
}
