//! In-memory directory server.
//!
//! Holds entries in a shared list and answers searches with the same
//! semantics a directory server applies: RFC 4515 filters with
//! three-valued evaluation, base/scope selection, server-side sorting and
//! a size limit that cuts the result stream short.

use super::connection::{
    DirectoryConnection, DirectoryError, DirectoryResult, Entry, EntryStream, SearchRequest,
    SearchScope,
};
use crate::filter::{SortKey, SortOrder};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;

/// Parsed search filter
#[derive(Debug, Clone, PartialEq)]
pub enum LdapFilter {
    And(Vec<LdapFilter>),
    Or(Vec<LdapFilter>),
    Not(Box<LdapFilter>),
    Equal(String, Vec<u8>),
    Present(String),
    Substring {
        attribute: String,
        initial: Option<Vec<u8>>,
        any: Vec<Vec<u8>>,
        last: Option<Vec<u8>>,
    },
    GreaterOrEqual(String, Vec<u8>),
    LessOrEqual(String, Vec<u8>),
}

impl LdapFilter {
    pub fn parse(filter: &str) -> DirectoryResult<Self> {
        let mut parser = FilterParser {
            input: filter.as_bytes(),
            pos: 0,
        };
        let parsed = parser.filter().map_err(|message| DirectoryError::InvalidFilter {
            filter: filter.to_string(),
            message,
        })?;
        if parser.pos != parser.input.len() {
            return Err(DirectoryError::InvalidFilter {
                filter: filter.to_string(),
                message: format!("unexpected trailing input at {}", parser.pos),
            });
        }
        Ok(parsed)
    }

    /// Evaluate against an entry. `None` is the Undefined result a filter
    /// item yields when the entry lacks the attribute.
    pub fn evaluate(&self, entry: &Entry) -> Option<bool> {
        match self {
            LdapFilter::And(filters) => {
                let mut result = Some(true);
                for filter in filters {
                    match filter.evaluate(entry) {
                        Some(false) => return Some(false),
                        None => result = None,
                        Some(true) => {}
                    }
                }
                result
            }
            LdapFilter::Or(filters) => {
                let mut result = Some(false);
                for filter in filters {
                    match filter.evaluate(entry) {
                        Some(true) => return Some(true),
                        None => result = None,
                        Some(false) => {}
                    }
                }
                result
            }
            LdapFilter::Not(filter) => filter.evaluate(entry).map(|b| !b),
            LdapFilter::Present(attribute) => {
                // Every entry has an object class
                if attribute.eq_ignore_ascii_case("objectClass") {
                    return Some(true);
                }
                Some(entry.values(attribute).is_some_and(|values| !values.is_empty()))
            }
            LdapFilter::Equal(attribute, assertion) => {
                any_value(entry, attribute, |value| compare_values(value, assertion).is_eq())
            }
            LdapFilter::GreaterOrEqual(attribute, assertion) => {
                any_value(entry, attribute, |value| compare_values(value, assertion).is_ge())
            }
            LdapFilter::LessOrEqual(attribute, assertion) => {
                any_value(entry, attribute, |value| compare_values(value, assertion).is_le())
            }
            LdapFilter::Substring {
                attribute,
                initial,
                any,
                last,
            } => any_value(entry, attribute, |value| {
                substring_matches(value, initial.as_deref(), any, last.as_deref())
            }),
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        self.evaluate(entry) == Some(true)
    }
}

fn any_value(entry: &Entry, attribute: &str, mut test: impl FnMut(&[u8]) -> bool) -> Option<bool> {
    let values = entry.values(attribute).filter(|values| !values.is_empty())?;
    Some(values.iter().any(|value| test(value)))
}

/// Integer-aware, case-insensitive ordering of two attribute values
fn compare_values(left: &[u8], right: &[u8]) -> Ordering {
    let left = String::from_utf8_lossy(left);
    let right = String::from_utf8_lossy(right);
    if let (Ok(a), Ok(b)) = (left.trim().parse::<i64>(), right.trim().parse::<i64>()) {
        return a.cmp(&b);
    }
    if let (Ok(a), Ok(b)) = (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        if let Some(ordering) = a.partial_cmp(&b) {
            return ordering;
        }
    }
    left.to_lowercase().cmp(&right.to_lowercase())
}

fn substring_matches(value: &[u8], initial: Option<&[u8]>, any: &[Vec<u8>], last: Option<&[u8]>) -> bool {
    let lower = |bytes: &[u8]| String::from_utf8_lossy(bytes).to_lowercase();
    let value = lower(value);
    let mut rest = value.as_str();

    if let Some(initial) = initial {
        let initial = lower(initial);
        match rest.strip_prefix(initial.as_str()) {
            Some(stripped) => rest = stripped,
            None => return false,
        }
    }
    for chunk in any {
        let chunk = lower(chunk);
        match rest.find(chunk.as_str()) {
            Some(at) => rest = &rest[at + chunk.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(lower(last).as_str()),
        None => true,
    }
}

struct FilterParser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl FilterParser<'_> {
    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expect(&mut self, byte: u8) -> Result<(), String> {
        match self.peek() {
            Some(b) if b == byte => {
                self.pos += 1;
                Ok(())
            }
            Some(b) => Err(format!(
                "expected '{}' at {}, found '{}'",
                char::from(byte),
                self.pos,
                char::from(b)
            )),
            None => Err(format!("expected '{}' at end of filter", char::from(byte))),
        }
    }

    fn filter(&mut self) -> Result<LdapFilter, String> {
        self.expect(b'(')?;
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                LdapFilter::And(self.filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                LdapFilter::Or(self.filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                LdapFilter::Not(Box::new(self.filter()?))
            }
            _ => self.item()?,
        };
        self.expect(b')')?;
        Ok(filter)
    }

    fn filter_list(&mut self) -> Result<Vec<LdapFilter>, String> {
        let mut filters = Vec::new();
        while self.peek() == Some(b'(') {
            filters.push(self.filter()?);
        }
        if filters.is_empty() {
            return Err(format!("empty filter list at {}", self.pos));
        }
        Ok(filters)
    }

    fn item(&mut self) -> Result<LdapFilter, String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'>' | b'<' | b'~' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attribute = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| format!("invalid attribute name at {}", start))?
            .trim()
            .to_string();
        if attribute.is_empty() {
            return Err(format!("missing attribute name at {}", start));
        }

        let op = match self.peek() {
            Some(b'=') => b'=',
            Some(op @ (b'>' | b'<' | b'~')) => {
                self.pos += 1;
                op
            }
            _ => return Err(format!("missing comparison operator at {}", self.pos)),
        };
        self.expect(b'=')?;

        let raw_start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let raw = &self.input[raw_start..self.pos];

        match op {
            b'>' => Ok(LdapFilter::GreaterOrEqual(attribute, unescape(raw)?)),
            b'<' => Ok(LdapFilter::LessOrEqual(attribute, unescape(raw)?)),
            // Approximate matching falls back to equality
            b'~' => Ok(LdapFilter::Equal(attribute, unescape(raw)?)),
            _ if raw == b"*" => Ok(LdapFilter::Present(attribute)),
            _ if raw.contains(&b'*') => {
                let mut chunks = raw
                    .split(|b| *b == b'*')
                    .map(unescape)
                    .collect::<Result<Vec<_>, _>>()?;
                let last = chunks.pop().filter(|chunk| !chunk.is_empty());
                let first = chunks.remove(0);
                let initial = Some(first).filter(|chunk| !chunk.is_empty());
                let any = chunks.into_iter().filter(|chunk| !chunk.is_empty()).collect();
                Ok(LdapFilter::Substring {
                    attribute,
                    initial,
                    any,
                    last,
                })
            }
            _ => Ok(LdapFilter::Equal(attribute, unescape(raw)?)),
        }
    }
}

/// Decode `\XX` escapes in an assertion value
fn unescape(raw: &[u8]) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::with_capacity(raw.len());
    let mut iter = raw.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        let hex = [iter.next().copied(), iter.next().copied()];
        let decoded = match hex {
            [Some(hi), Some(lo)] => std::str::from_utf8(&[hi, lo])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok()),
            _ => None,
        };
        bytes.push(decoded.ok_or_else(|| "invalid escape sequence".to_string())?);
    }
    Ok(bytes)
}

fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let dn = normalize_dn(dn);
    let base = normalize_dn(base);
    if base.is_empty() {
        return match scope {
            SearchScope::Base => dn.is_empty(),
            SearchScope::OneLevel => !dn.is_empty() && !dn.contains(','),
            SearchScope::Subtree => true,
        };
    }
    let child = dn
        .strip_suffix(base.as_str())
        .and_then(|prefix| prefix.strip_suffix(','));
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => child.is_some_and(|rdn| !rdn.contains(',')),
        SearchScope::Subtree => dn == base || child.is_some(),
    }
}

/// Server-side sort: entries lacking a key attribute order after all others
fn compare_entries(a: &Entry, b: &Entry, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let first = |entry: &Entry| {
            entry
                .values(&key.attribute)
                .and_then(|values| values.first())
                .cloned()
        };
        let ordering = match (first(a), first(b)) {
            (Some(x), Some(y)) => compare_values(&x, &y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn project(entry: &Entry, attributes: &[String]) -> Entry {
    let mut projected = Entry::new(entry.dn.clone());
    for (name, values) in &entry.attributes {
        if attributes.iter().any(|wanted| wanted.eq_ignore_ascii_case(name)) {
            projected.attributes.insert(name.clone(), values.clone());
        }
    }
    projected
}

/// Directory whose entries live in memory. Clones share the same entries,
/// so every clone acts as a separate connection to one server.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    entries: Arc<RwLock<Vec<Entry>>>,
    size_limit: Option<usize>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server-enforced limit on entries per search
    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = Some(size_limit);
        self
    }

    pub fn with_entry(self, entry: Entry) -> Self {
        self.add(entry);
        self
    }

    pub fn add(&self, entry: Entry) {
        self.entries.write().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Open a connection to this directory
    pub fn connect(&self) -> DirectoryResult<Box<dyn DirectoryConnection>> {
        Ok(Box::new(self.clone()))
    }
}

impl DirectoryConnection for InMemoryDirectory {
    fn search(&mut self, request: &SearchRequest) -> DirectoryResult<EntryStream<'_>> {
        let filter = LdapFilter::parse(&request.filter)?;
        let mut matched: Vec<Entry> = self
            .entries
            .read()
            .iter()
            .filter(|entry| in_scope(&entry.dn, &request.base, request.scope))
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        if !request.sort.is_empty() {
            matched.sort_by(|a, b| compare_entries(a, b, &request.sort));
        }
        if !request.attributes.is_empty() {
            matched = matched
                .iter()
                .map(|entry| project(entry, &request.attributes))
                .collect();
        }

        let limit = match (self.size_limit, request.size_limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let Some(limit) = limit.filter(|&limit| matched.len() > limit) else {
            return Ok(Box::new(matched.into_iter().map(DirectoryResult::Ok)));
        };
        matched.truncate(limit);
        Ok(Box::new(
            matched
                .into_iter()
                .map(DirectoryResult::Ok)
                .chain(std::iter::once(Err(DirectoryError::SizeLimitExceeded))),
        ))
    }
}
