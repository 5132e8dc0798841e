//! Reference sequence allocation.

use rusqlite::{Connection, params};

use crate::errors::Result;

/// Reference sequence repository.
pub struct SequenceRepo;

impl SequenceRepo {
    /// Allocate the next sequence number for `(prefix, year)`, starting at 1.
    ///
    /// A single upsert, so two writers can never observe the same value.
    pub fn next(conn: &Connection, prefix: &str, year: i32) -> Result<u64> {
        let value: i64 = conn.query_row(
            "INSERT INTO reference_sequences (prefix, year, next_value) VALUES (?1, ?2, 1)
             ON CONFLICT(prefix, year) DO UPDATE SET next_value = next_value + 1
             RETURNING next_value",
            params![prefix, year],
            |row| row.get(0),
        )?;
        Ok(value.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::migrations::run_migrations;

    #[test]
    fn sequences_are_per_prefix_and_year() {
        let conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&conn).unwrap();

        assert_eq!(SequenceRepo::next(&conn, "MB", 2026).unwrap(), 1);
        assert_eq!(SequenceRepo::next(&conn, "MB", 2026).unwrap(), 2);
        assert_eq!(SequenceRepo::next(&conn, "MB", 2027).unwrap(), 1);
        assert_eq!(SequenceRepo::next(&conn, "RE", 2026).unwrap(), 1);
        assert_eq!(SequenceRepo::next(&conn, "MB", 2026).unwrap(), 3);
    }

    mod proptests {
        use std::collections::HashMap;

        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn allocation_counts_up_per_key(
                keys in proptest::collection::vec((prop_oneof![Just("MB"), Just("RE"), Just("ZZ")], 2025i32..2028), 1..64),
            ) {
                let conn = Connection::open_in_memory().unwrap();
                let _ = run_migrations(&conn).unwrap();

                let mut issued: HashMap<(&str, i32), u64> = HashMap::new();
                for (prefix, year) in keys {
                    let value = SequenceRepo::next(&conn, prefix, year).unwrap();
                    let last = issued.entry((prefix, year)).or_insert(0);
                    prop_assert_eq!(value, *last + 1);
                    *last = value;
                }
            }
        }
    }
}
