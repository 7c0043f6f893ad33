//! Reader for the relational (RSF) dump of a Kconfig database.
//!
//! The format is line oriented: `<RelationName> <key> <values...>`, fields
//! separated by whitespace; a field may be double-quoted to carry embedded
//! spaces (dependency expressions usually are). Every relation becomes an
//! ordered multimap keyed by its first column; row order follows the file.

use std::io::{self, BufRead};

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct RsfRow {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Relation {
    rows: Vec<RsfRow>,
}

impl Relation {
    pub fn iter(&self) -> impl Iterator<Item = &RsfRow> {
        self.rows.iter()
    }

    /// Values of the first row with the given key.
    pub fn values_for(&self, key: &str) -> Option<&[String]> {
        self.rows
            .iter()
            .find(|r| r.key == key)
            .map(|r| r.values.as_slice())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct RsfDocument {
    relations: IndexMap<String, Relation>,
}

impl RsfDocument {
    pub fn parse(reader: impl BufRead) -> io::Result<Self> {
        let mut doc = RsfDocument::default();
        for line in reader.lines() {
            let line = line?;
            let mut fields = split_fields(&line).into_iter();
            let Some(relation) = fields.next() else {
                continue;
            };
            if relation.starts_with('#') {
                continue;
            }
            let Some(key) = fields.next() else {
                log::warn!("rsf row without a key: {}", line);
                continue;
            };
            doc.relations
                .entry(relation)
                .or_default()
                .rows
                .push(RsfRow {
                    key,
                    values: fields.collect(),
                });
        }
        Ok(doc)
    }

    pub fn parse_str(input: &str) -> Self {
        // reading from a string cannot fail
        Self::parse(io::Cursor::new(input)).unwrap_or_default()
    }

    /// The relation with the given name; absent relations read as empty.
    pub fn relation(&self, name: &str) -> &Relation {
        static EMPTY: Relation = Relation { rows: Vec::new() };
        self.relations.get(name).unwrap_or(&EMPTY)
    }
}

/// Whitespace splitting with double-quote grouping; quotes are stripped.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                if !in_quotes {
                    fields.push(std::mem::take(&mut current));
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    fields.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        fields.push(current);
    }
    fields
}
