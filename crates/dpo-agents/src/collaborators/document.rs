//! Document text, table and entity extraction

use super::CollaboratorError;
use async_trait::async_trait;
use dpo_types::{Scalar, Table, Value};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything pulled out of one document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractedDocument {
    /// Name the document was requested by
    pub name: String,
    /// Full text
    pub text: String,
    /// Delimited tables found in the text
    pub tables: Vec<Table>,
    /// Entity kind (`EMAIL`, `DATE`, ...) to distinct matches in order of appearance
    pub entities: BTreeMap<String, Vec<String>>,
}

impl ExtractedDocument {
    /// Map value with `name`, `text`, `tables` and `entities` keys
    #[must_use]
    pub fn to_value(&self) -> Value {
        let entities = self
            .entities
            .iter()
            .map(|(kind, found)| {
                let list = found.iter().cloned().map(Value::Str).collect();
                (kind.clone(), Value::List(list))
            })
            .collect();
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::Str(self.name.clone()));
        map.insert("text".to_string(), Value::Str(self.text.clone()));
        map.insert(
            "tables".to_string(),
            Value::List(self.tables.iter().cloned().map(Value::Table).collect()),
        );
        map.insert("entities".to_string(), Value::Map(entities));
        Value::Map(map)
    }
}

/// Turns named documents into text, tables and entities
#[async_trait]
pub trait DocumentExtraction: Send + Sync {
    /// Extract everything from the document called `name`
    async fn extract(&self, name: &str) -> Result<ExtractedDocument, CollaboratorError>;
}

/// Extractor over plain-text documents held in memory
///
/// Tables are runs of two or more lines split by the same delimiter (`|`,
/// tab or `,`) into the same number of fields; the first line is the header.
/// Entities are found with regular expressions.
#[derive(Debug, Default)]
pub struct PlainTextExtractor {
    documents: RwLock<BTreeMap<String, String>>,
}

impl PlainTextExtractor {
    /// Extractor with no documents
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Self::add_document`]
    #[must_use]
    pub fn with_document(self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.add_document(name, text);
        self
    }

    /// Make `text` available as document `name`
    pub fn add_document(&self, name: impl Into<String>, text: impl Into<String>) {
        self.documents.write().insert(name.into(), text.into());
    }
}

#[async_trait]
impl DocumentExtraction for PlainTextExtractor {
    async fn extract(&self, name: &str) -> Result<ExtractedDocument, CollaboratorError> {
        let text = self
            .documents
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CollaboratorError::Extraction(format!("unknown document: {name}")))?;
        let tables = detect_tables(&text);
        let entities = extract_entities(&text);
        tracing::debug!(document = name, tables = tables.len(), entity_kinds = entities.len(), "extracted document");
        Ok(ExtractedDocument {
            name: name.to_string(),
            text,
            tables,
            entities,
        })
    }
}

static ENTITY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("EMAIL", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
        ("URL", r"https?://[^\s<>()]+"),
        (
            "DATE",
            r"(?i)\b\d{4}-\d{2}-\d{2}\b|\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b|\b(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.? \d{1,2},? \d{4}\b",
        ),
        ("MONEY", r"\$\s?\d+(?:,\d{3})*(?:\.\d{2})?"),
        ("PERCENTAGE", r"\b\d+(?:\.\d+)?%"),
        ("PHONE", r"\(?\b\d{3}\)?[-. ]\d{3}[-.]\d{4}\b"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("entity pattern is valid")))
    .collect()
});

/// Entities by kind, each list deduplicated in order of appearance
#[must_use]
pub fn extract_entities(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    for (kind, re) in ENTITY_PATTERNS.iter() {
        let mut found: Vec<String> = Vec::new();
        for m in re.find_iter(text) {
            let s = m.as_str().trim().to_string();
            if !found.contains(&s) {
                found.push(s);
            }
        }
        if !found.is_empty() {
            out.insert((*kind).to_string(), found);
        }
    }
    out
}

const DELIMITERS: [char; 3] = ['|', '\t', ','];

/// Find delimited tables in free text
#[must_use]
pub fn detect_tables(text: &str) -> Vec<Table> {
    let mut tables = Vec::new();
    let mut block: Vec<&str> = Vec::new();
    for line in text.lines().chain(std::iter::once("")) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if let Some(table) = block_to_table(&block) {
                tables.push(table);
            }
            block.clear();
        } else if !is_rule(trimmed) {
            block.push(trimmed);
        }
    }
    tables
}

/// Markdown separator such as `|---|:--:|`
fn is_rule(line: &str) -> bool {
    line.contains('-') && line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' ' | '+'))
}

fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let line = if delimiter == '|' {
        line.trim_start_matches('|').trim_end_matches('|')
    } else {
        line
    };
    line.split(delimiter).map(|c| c.trim().to_string()).collect()
}

fn block_to_table(lines: &[&str]) -> Option<Table> {
    if lines.len() < 2 {
        return None;
    }
    let delimiter = DELIMITERS
        .into_iter()
        .find(|d| lines.iter().all(|l| l.contains(*d)))?;
    let rows: Vec<Vec<String>> = lines.iter().map(|l| split_line(l, delimiter)).collect();
    let width = rows[0].len();
    if width < 2 || rows.iter().any(|r| r.len() != width) {
        return None;
    }
    let header = rows[0].clone();
    let body = rows[1..]
        .iter()
        .map(|r| r.iter().map(|cell| Scalar::infer(cell)).collect())
        .collect();
    Table::from_rows(header, body).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_entity_pattern_compiles() {
        let kinds: Vec<&str> = ENTITY_PATTERNS.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, ["EMAIL", "URL", "DATE", "MONEY", "PERCENTAGE", "PHONE"]);
    }

    const REPORT: &str = "Quarterly report, issued 2024-03-31.\n\
Contact finance@example.com or see https://example.com/q1 for details.\n\
Revenue grew 12.5% to $1,250,000.00.\n\
\n\
| region | revenue |\n\
|--------|---------|\n\
| North  | 500     |\n\
| South  | 750     |\n\
\n\
Call 555-123-4567 with questions.";

    #[test]
    fn finds_pipe_table() {
        let tables = detect_tables(REPORT);
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.columns(), ["region", "revenue"]);
        assert_eq!(t.row_count(), 2);
        assert_eq!(t.rows()[1][1], Scalar::Int(750));
    }

    #[test]
    fn prose_with_commas_is_not_a_table() {
        assert!(detect_tables("one, two\nthree").is_empty());
        assert!(detect_tables("a, b, c\nd, e").is_empty());
    }

    #[test]
    fn entities_by_kind() {
        let entities = extract_entities(REPORT);
        assert_eq!(entities["EMAIL"], vec!["finance@example.com"]);
        assert_eq!(entities["DATE"], vec!["2024-03-31"]);
        assert_eq!(entities["PERCENTAGE"], vec!["12.5%"]);
        assert_eq!(entities["MONEY"], vec!["$1,250,000.00"]);
        assert_eq!(entities["PHONE"], vec!["555-123-4567"]);
        assert!(entities["URL"][0].starts_with("https://example.com/q1"));
    }

    #[tokio::test]
    async fn unknown_document_is_an_extraction_error() {
        let extractor = PlainTextExtractor::new().with_document("r", REPORT);
        assert!(extractor.extract("r").await.is_ok());
        let err = extractor.extract("missing").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Extraction(_)));
    }

    #[tokio::test]
    async fn value_exposes_primary_table() {
        let extractor = PlainTextExtractor::new().with_document("r", REPORT);
        let value = extractor.extract("r").await.unwrap().to_value();
        assert_eq!(value.primary_table().unwrap().row_count(), 2);
    }
}
