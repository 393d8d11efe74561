//! Pure query composition.
//!
//! Every public keybase operation is described by a [`Select`] or a
//! [`Statement`]: a list of [`Predicate`]s that all must hold plus, for
//! reads, a [`Projection`]. Building one performs no I/O; each
//! [`EntryLog`](crate::log::EntryLog) backend consumes them through a single
//! execution path.

use std::fmt;

use crate::entry::{Entry, Timestamp};

/// One element of a parsed glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobToken {
    /// Matches this character exactly
    Literal(char),
    /// Matches exactly one character (`?`)
    AnyChar,
    /// Matches any run of characters, including none (`*`)
    AnyRun,
}

/// Key pattern for [`match_key`]
///
/// `*` matches any run of characters and `?` exactly one. Every other
/// character is literal, including `%`, `_` and `[`. A backslash makes the
/// following character literal (`\*`, `\?`, `\\`); a trailing backslash is
/// itself a literal.
///
/// Literals compare ASCII letters without regard to case; other characters
/// must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    tokens: Vec<GlobToken>,
}

impl Pattern {
    pub fn glob(pattern: &str) -> Self {
        let mut tokens = Vec::with_capacity(pattern.len());
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            let token = match c {
                '*' => {
                    // Collapse runs of `*`; they match the same strings
                    if tokens.last() == Some(&GlobToken::AnyRun) {
                        continue;
                    }
                    GlobToken::AnyRun
                }
                '?' => GlobToken::AnyChar,
                '\\' => GlobToken::Literal(chars.next().unwrap_or('\\')),
                other => GlobToken::Literal(other),
            };
            tokens.push(token);
        }

        Self {
            source: pattern.to_string(),
            tokens,
        }
    }

    /// The pattern as written by the caller
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> &[GlobToken] {
        &self.tokens
    }

    /// Checks `candidate` against the whole pattern
    pub fn matches(&self, candidate: &str) -> bool {
        let text: Vec<char> = candidate.chars().collect();
        let tokens = &self.tokens;

        let (mut t, mut p) = (0usize, 0usize);
        // Position of the last `*` seen and the text index it resumed from
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match tokens.get(p) {
                Some(GlobToken::AnyRun) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                Some(GlobToken::AnyChar) => {
                    t += 1;
                    p += 1;
                }
                Some(GlobToken::Literal(c)) if c.eq_ignore_ascii_case(&text[t]) => {
                    t += 1;
                    p += 1;
                }
                _ => match backtrack {
                    Some((star, resumed)) => {
                        p = star + 1;
                        t = resumed + 1;
                        backtrack = Some((star, t));
                    }
                    None => return false,
                },
            }
        }

        tokens[p..].iter().all(|token| *token == GlobToken::AnyRun)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Entry column that can be projected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Namespace,
    Key,
}

impl Column {
    pub fn name(self) -> &'static str {
        match self {
            Column::Namespace => "namespace",
            Column::Key => "key",
        }
    }

    pub fn value(self, entry: &Entry) -> &str {
        match self {
            Column::Namespace => entry.namespace(),
            Column::Key => entry.key(),
        }
    }
}

/// Constraint an entry must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    NamespaceEq(String),
    KeyEq(String),
    KeyMatches(Pattern),
    /// `expiration > at`
    ActiveAt(Timestamp),
    /// `expiration <= at`
    StaleAt(Timestamp),
}

impl Predicate {
    pub fn eval(&self, entry: &Entry) -> bool {
        match self {
            Predicate::NamespaceEq(namespace) => entry.namespace() == namespace,
            Predicate::KeyEq(key) => entry.key() == key,
            Predicate::KeyMatches(pattern) => pattern.matches(entry.key()),
            Predicate::ActiveAt(at) => entry.is_active_at(*at),
            Predicate::StaleAt(at) => entry.is_stale_at(*at),
        }
    }
}

/// What a read returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// One row per matching entry holding `column`
    Values { column: Column, distinct: bool },
    /// Single integer: matching entries, or distinct values of `column`
    Count { column: Column, distinct: bool },
    /// Single integer: matching entries, or distinct (namespace, key) pairs
    CountPairs { distinct: bool },
}

/// A read descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub projection: Projection,
    pub predicates: Vec<Predicate>,
}

impl Select {
    fn new(projection: Projection) -> Self {
        Self {
            projection,
            predicates: Vec::new(),
        }
    }

    fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    fn active(self, active: bool, at: Timestamp) -> Self {
        if active {
            self.filter(Predicate::ActiveAt(at))
        } else {
            self
        }
    }

    /// Checks whether `entry` passes every predicate
    pub fn admits(&self, entry: &Entry) -> bool {
        self.predicates.iter().all(|predicate| predicate.eval(entry))
    }
}

/// A write descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert(Entry),
    /// Removes every entry passing all predicates; no predicates removes all
    Delete(Vec<Predicate>),
}

pub fn put(entry: Entry) -> Statement {
    Statement::Insert(entry)
}

pub fn match_key(
    namespace: &str,
    pattern: &Pattern,
    active: bool,
    unique: bool,
    at: Timestamp,
) -> Select {
    Select::new(Projection::Values {
        column: Column::Key,
        distinct: unique,
    })
    .filter(Predicate::NamespaceEq(namespace.to_string()))
    .filter(Predicate::KeyMatches(pattern.clone()))
    .active(active, at)
}

pub fn count_key(namespace: &str, key: &str, active: bool, at: Timestamp) -> Select {
    Select::new(Projection::Count {
        column: Column::Key,
        distinct: false,
    })
    .filter(Predicate::NamespaceEq(namespace.to_string()))
    .filter(Predicate::KeyEq(key.to_string()))
    .active(active, at)
}

pub fn get_keys(namespace: &str, active: bool, unique: bool, at: Timestamp) -> Select {
    Select::new(Projection::Values {
        column: Column::Key,
        distinct: unique,
    })
    .filter(Predicate::NamespaceEq(namespace.to_string()))
    .active(active, at)
}

pub fn count_keys(namespace: &str, active: bool, unique: bool, at: Timestamp) -> Select {
    Select::new(Projection::Count {
        column: Column::Key,
        distinct: unique,
    })
    .filter(Predicate::NamespaceEq(namespace.to_string()))
    .active(active, at)
}

pub fn get_namespaces(active: bool, at: Timestamp) -> Select {
    Select::new(Projection::Values {
        column: Column::Namespace,
        distinct: true,
    })
    .active(active, at)
}

pub fn count_namespaces(active: bool, at: Timestamp) -> Select {
    Select::new(Projection::Count {
        column: Column::Namespace,
        distinct: true,
    })
    .active(active, at)
}

/// Counts across every namespace; `unique` collapses repeated (namespace, key) pairs
pub fn count_entries(active: bool, unique: bool, at: Timestamp) -> Select {
    Select::new(Projection::CountPairs { distinct: unique }).active(active, at)
}

pub fn prune_entries(at: Timestamp) -> Statement {
    Statement::Delete(vec![Predicate::StaleAt(at)])
}

pub fn clear_entries() -> Statement {
    Statement::Delete(Vec::new())
}
