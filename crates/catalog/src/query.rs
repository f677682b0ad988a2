//! Query pipeline: tag expression, search filter, sort and pagination.
//!
//! [`Catalog::query`](crate::Catalog::query) drives the stages; everything
//! here is pure so that sorting and pagination can run after the catalog
//! lock has been released.

use crate::error::{ErrorKind, Result};
use crate::models::FileRecord;
use derive_more::Display;
use exn::ResultExt;
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;
use std::str::FromStr;
use tagd_expr::{Expression, TagSet};

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    #[display("name")]
    Name,
    #[display("size")]
    Size,
    #[display("time")]
    Time,
}

impl FromStr for SortKey {
    type Err = ErrorKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(Self::Name),
            "size" => Ok(Self::Size),
            "time" => Ok(Self::Time),
            other => Err(ErrorKind::Validation(format!("unknown sort key `{other}`"))),
        }
    }
}

#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    #[display("asc")]
    Asc,
    #[display("desc")]
    Desc,
}

impl FromStr for SortOrder {
    type Err = ErrorKind;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            other => Err(ErrorKind::Validation(format!("unknown sort order `{other}`"))),
        }
    }
}

fn lowercase(name: &str) -> impl Iterator<Item = char> + '_ {
    name.chars().flat_map(char::to_lowercase)
}

/// How query results are ordered. Equal keys always fall back to ascending
/// identifier, whatever the order.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
#[display("{key}-{order}")]
pub struct SortMode {
    pub key: SortKey,
    pub order: SortOrder,
}

impl SortMode {
    pub fn new(key: SortKey, order: SortOrder) -> Self {
        Self { key, order }
    }

    fn compare(&self, a: &FileRecord, b: &FileRecord) -> Ordering {
        let by_key = match self.key {
            // Case-insensitive, so "b.txt" sorts between "A.txt" and "C.txt".
            SortKey::Name => lowercase(&a.filename).cmp(lowercase(&b.filename)),
            SortKey::Size => a.size.cmp(&b.size),
            SortKey::Time => a.created_at.cmp(&b.created_at),
        };
        let by_key = match self.order {
            SortOrder::Asc => by_key,
            SortOrder::Desc => by_key.reverse(),
        };
        by_key.then(a.id.cmp(&b.id))
    }

    pub(crate) fn sort(&self, records: &mut [FileRecord]) {
        records.sort_by(|a, b| self.compare(a, b));
    }
}

/// Parameters of a catalog query. The default query returns every active
/// file sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Tag expression; empty matches everything.
    pub expression: String,
    pub sort: SortMode,
    /// Text matched against filename and description; empty disables the
    /// search filter. Matching is always case-insensitive: plain text as a
    /// substring, patterns as if compiled with the `i` flag. A pattern can
    /// opt back into case-sensitive matching with an inline `(?-i)`.
    pub search: String,
    /// Treat `search` as a regular expression instead of plain text.
    pub regex: bool,
    pub offset: usize,
    /// Page size; `0` returns everything from `offset` on.
    pub count: usize,
    /// Also consider files that are in the trash.
    pub include_trashed: bool,
}

/// Result of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    /// The requested page. `total` counts all matches, not only the ones on
    /// this page.
    Records { total: usize, records: Vec<FileRecord> },
    /// The offset points past the last match. Not an error: the caller asked
    /// for a page that doesn't exist.
    OffsetOutOfBounds { total: usize },
}

impl Page {
    pub fn total(&self) -> usize {
        match self {
            Self::Records { total, .. } | Self::OffsetOutOfBounds { total } => *total,
        }
    }

    /// Records on this page; empty when the offset was out of bounds.
    pub fn records(&self) -> &[FileRecord] {
        match self {
            Self::Records { records, .. } => records,
            Self::OffsetOutOfBounds { .. } => &[],
        }
    }

    pub fn into_records(self) -> Vec<FileRecord> {
        match self {
            Self::Records { records, .. } => records,
            Self::OffsetOutOfBounds { .. } => Vec::new(),
        }
    }
}

enum Search {
    Everything,
    Text(String),
    Pattern(Regex),
}

impl Search {
    fn matches(&self, record: &FileRecord) -> bool {
        match self {
            Self::Everything => true,
            Self::Text(needle) => {
                record.filename.to_lowercase().contains(needle) || record.description.to_lowercase().contains(needle)
            },
            Self::Pattern(pattern) => pattern.is_match(&record.filename) || pattern.is_match(&record.description),
        }
    }
}

/// A query whose expression and pattern have been compiled.
pub(crate) struct Filter {
    expression: Expression,
    search: Search,
    include_trashed: bool,
}

impl Filter {
    /// Compiles the expression, then the search pattern. Both failures are
    /// reported before the catalog is touched.
    pub fn compile(query: &Query) -> Result<Self> {
        let expression = match tagd_expr::compile(&query.expression) {
            Ok(expression) => expression,
            Err(err) => {
                let reason = (*err).to_string();
                let position = err.position();
                return Err(err).or_raise(|| ErrorKind::BadExpressionSyntax { reason, position });
            },
        };
        let search = match (query.search.as_str(), query.regex) {
            ("", _) => Search::Everything,
            (text, false) => Search::Text(text.to_lowercase()),
            (pattern, true) => Search::Pattern(
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .size_limit(1 << 20)
                    .build()
                    .or_raise(|| ErrorKind::BadSearchPattern(pattern.to_string()))?,
            ),
        };
        Ok(Self { expression, search, include_trashed: query.include_trashed })
    }

    /// `known` restricts which of the record's tags count as present; tags
    /// deleted from the registry but still referenced are ignored.
    pub fn matches(&self, record: &FileRecord, known: Option<&TagSet>) -> bool {
        if record.is_trashed() && !self.include_trashed {
            return false;
        }
        let tags_match = match known {
            None => self.expression.evaluate(&record.tags),
            Some(known) => self.expression.evaluate_by(|id| record.tags.contains(&id) && known.contains(&id)),
        };
        tags_match && self.search.matches(record)
    }
}

/// Cuts the page out of the sorted matches.
pub(crate) fn paginate(mut records: Vec<FileRecord>, offset: usize, count: usize) -> Page {
    let total = records.len();
    if offset > total || (offset == total && total > 0) {
        return Page::OffsetOutOfBounds { total };
    }
    records.drain(..offset);
    if count > 0 {
        records.truncate(count);
    }
    Page::Records { total, records }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrashState;
    use rstest::rstest;
    use time::macros::datetime;

    fn record(id: u64, filename: &str, size: u64) -> FileRecord {
        FileRecord {
            id,
            filename: filename.to_string(),
            original_name: filename.to_string(),
            size,
            mime: "text/plain".to_string(),
            created_at: datetime!(2024-01-01 00:00 UTC) + time::Duration::minutes(id as i64),
            description: String::new(),
            tags: TagSet::new(),
            trash: TrashState::Active,
            preview: None,
        }
    }

    fn ids(records: &[FileRecord]) -> Vec<u64> {
        records.iter().map(|r| r.id).collect()
    }

    #[rstest]
    #[case("name", "asc", "name-asc")]
    #[case("SIZE", "Desc", "size-desc")]
    #[case("time", "asc", "time-asc")]
    fn test_sort_mode_parsing(#[case] key: &str, #[case] order: &str, #[case] expected: &str) {
        let mode = SortMode::new(key.parse().unwrap(), order.parse().unwrap());
        assert_eq!(mode.to_string(), expected);
    }

    #[test]
    fn test_unknown_sort_key() {
        assert!(matches!("colour".parse::<SortKey>(), Err(ErrorKind::Validation(_))));
        assert!(matches!("up".parse::<SortOrder>(), Err(ErrorKind::Validation(_))));
    }

    #[rstest]
    #[case(SortKey::Name, SortOrder::Asc, vec![2, 4, 1, 3])]
    #[case(SortKey::Name, SortOrder::Desc, vec![3, 1, 2, 4])]
    #[case(SortKey::Size, SortOrder::Asc, vec![3, 1, 2, 4])]
    #[case(SortKey::Size, SortOrder::Desc, vec![2, 4, 1, 3])]
    #[case(SortKey::Time, SortOrder::Asc, vec![1, 2, 3, 4])]
    #[case(SortKey::Time, SortOrder::Desc, vec![4, 3, 2, 1])]
    fn test_sorting(#[case] key: SortKey, #[case] order: SortOrder, #[case] expected: Vec<u64>) {
        let mut records = vec![record(3, "c.txt", 1), record(1, "B.txt", 5), record(4, "a.txt", 9), record(2, "a.txt", 9)];
        SortMode::new(key, order).sort(&mut records);
        assert_eq!(ids(&records), expected);
    }

    #[test]
    fn test_name_sort_folds_case_beyond_ascii() {
        let mut records = vec![record(1, "Zeta", 1), record(2, "ÄRGER", 1), record(3, "alpha", 1), record(4, "ärger", 1)];
        SortMode::new(SortKey::Name, SortOrder::Asc).sort(&mut records);
        assert_eq!(ids(&records), vec![3, 1, 2, 4]);
    }

    #[rstest]
    #[case(0, 0, Some(vec![1, 2, 3, 4, 5]))]
    #[case(2, 0, Some(vec![3, 4, 5]))]
    #[case(1, 2, Some(vec![2, 3]))]
    #[case(4, 10, Some(vec![5]))]
    #[case(5, 0, None)]
    #[case(6, 1, None)]
    fn test_pagination(#[case] offset: usize, #[case] count: usize, #[case] expected: Option<Vec<u64>>) {
        let records: Vec<_> = (1..=5).map(|id| record(id, "f", 1)).collect();
        match (paginate(records, offset, count), expected) {
            (Page::Records { total, records }, Some(expected)) => {
                assert_eq!(total, 5);
                assert_eq!(ids(&records), expected);
            },
            (Page::OffsetOutOfBounds { total }, None) => assert_eq!(total, 5),
            (page, expected) => panic!("unexpected {page:?} for {expected:?}"),
        }
    }

    #[test]
    fn test_empty_result_pagination() {
        assert_eq!(paginate(Vec::new(), 0, 0), Page::Records { total: 0, records: Vec::new() });
        assert_eq!(paginate(Vec::new(), 1, 0), Page::OffsetOutOfBounds { total: 0 });
    }

    #[test]
    fn test_plain_search_is_case_insensitive_substring() {
        let mut holiday = record(1, "Holiday.JPG", 1);
        holiday.description = "beach day".to_string();
        let query = |search: &str| Query { search: search.to_string(), ..Query::default() };
        let filter = Filter::compile(&query("holiday")).unwrap();
        assert!(filter.matches(&holiday, None));
        let filter = Filter::compile(&query("BEACH")).unwrap();
        assert!(filter.matches(&holiday, None));
        let filter = Filter::compile(&query("mountain")).unwrap();
        assert!(!filter.matches(&holiday, None));
        // Plain search never interprets metacharacters.
        let filter = Filter::compile(&query(".jpg$")).unwrap();
        assert!(!filter.matches(&holiday, None));
    }

    #[test]
    fn test_regex_search() {
        let file = record(1, "report-2024.pdf", 1);
        let query = |search: &str| Query { search: search.to_string(), regex: true, ..Query::default() };
        assert!(Filter::compile(&query(r"\d{4}\.PDF$")).unwrap().matches(&file, None));
        assert!(!Filter::compile(&query(r"^\d")).unwrap().matches(&file, None));
        assert!(!Filter::compile(&query(r"(?-i)PDF")).unwrap().matches(&file, None));
        assert!(Filter::compile(&query(r"(?-i)pdf")).unwrap().matches(&file, None));
        let err = Filter::compile(&query("(unclosed")).err().unwrap();
        assert_eq!(*err, ErrorKind::BadSearchPattern("(unclosed".to_string()));
    }

    #[test]
    fn test_expression_errors_are_reported_first() {
        let query = Query { expression: "1 &".to_string(), search: "(".to_string(), regex: true, ..Query::default() };
        let err = Filter::compile(&query).err().unwrap();
        assert!(matches!(&*err, ErrorKind::BadExpressionSyntax { position: 3, .. }));
        assert_eq!((*err).to_string(), "invalid tag expression: unexpected end of input at position 3");
    }

    #[test]
    fn test_trashed_and_stale_tags() {
        let mut file = record(1, "f", 1);
        file.tags = TagSet::from([1, 9]);
        let filter = Filter::compile(&Query { expression: "9".to_string(), ..Query::default() }).unwrap();
        assert!(filter.matches(&file, None));
        assert!(!filter.matches(&file, Some(&TagSet::from([1]))));

        file.trash = TrashState::Trashed { since: datetime!(2024-02-01 00:00 UTC) };
        assert!(!filter.matches(&file, None));
        let filter = Filter::compile(&Query { include_trashed: true, ..Query::default() }).unwrap();
        assert!(filter.matches(&file, None));
    }
}
