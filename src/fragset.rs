//! Compact range-based identifier sets for fragment relative indices
//!
//! A fragment-id set is persisted as text: tokens separated by `;`, each
//! token either a bare positive integer or an inclusive ascending range
//! `first-last`. Tokens may appear in any order and are never globally
//! re-sorted; mutation produces the minimal local splits only, so the text
//! round-trips token-for-token through the catalog.

use crate::error::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One parsed token of a fragment-id set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IdToken {
    first: u64,
    last: u64,
}

impl IdToken {
    fn count(&self) -> usize {
        (self.last - self.first + 1) as usize
    }

    fn contains(&self, id: u64) -> bool {
        self.first <= id && id <= self.last
    }
}

fn parse_token(text: &str) -> Result<IdToken> {
    let (first, last) = match text.split_once('-') {
        Some((a, b)) => (parse_id(a)?, parse_id(b)?),
        None => {
            let id = parse_id(text)?;
            (id, id)
        }
    };
    if first > last {
        return Err(CubeError::Parse(format!(
            "descending range token: {}",
            text
        )));
    }
    Ok(IdToken { first, last })
}

fn parse_id(text: &str) -> Result<u64> {
    let id: u64 = text
        .parse()
        .map_err(|_| CubeError::Parse(format!("malformed fragment id: {:?}", text)))?;
    if id == 0 {
        return Err(CubeError::Parse(
            "fragment ids are positive and 1-based".to_string(),
        ));
    }
    Ok(id)
}

/// Minimal text for an inclusive run: bare integer when `first == last`
fn render_token(first: u64, last: u64) -> String {
    if first == last {
        first.to_string()
    } else {
        format!("{}-{}", first, last)
    }
}

/// An ordered, deduplicated set of fragment relative indices
///
/// The textual form is the unit of persistence; all operations parse and
/// re-synthesize it. The empty set is represented by empty text so the set
/// stays closed under [`FragmentIdSet::remove`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FragmentIdSet {
    text: String,
}

impl FragmentIdSet {
    /// Parse an existing textual set, validating every token
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let set = Self { text: text.into() };
        set.tokens()?;
        Ok(set)
    }

    /// Build a set covering the inclusive run `first..=last`
    pub fn from_bounds(first: u64, last: u64) -> Result<Self> {
        if first == 0 {
            return Err(CubeError::Parse(
                "fragment ids are positive and 1-based".to_string(),
            ));
        }
        if first > last {
            return Err(CubeError::OutOfRange(format!(
                "range bounds out of order: {} > {}",
                first, last
            )));
        }
        Ok(Self {
            text: render_token(first, last),
        })
    }

    /// The persisted textual form
    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn tokens(&self) -> Result<Vec<IdToken>> {
        if self.text.is_empty() {
            return Ok(Vec::new());
        }
        self.text.split(';').map(parse_token).collect()
    }

    /// Number of fragment ids the set denotes
    pub fn count(&self) -> Result<usize> {
        Ok(self.tokens()?.iter().map(IdToken::count).sum())
    }

    /// The id at 0-based logical `position`
    pub fn id_at(&self, position: usize) -> Result<u64> {
        let mut walked = 0usize;
        for token in self.tokens()? {
            if position < walked + token.count() {
                return Ok(token.first + (position - walked) as u64);
            }
            walked += token.count();
        }
        Err(CubeError::OutOfRange(format!(
            "position {} outside set of {} ids",
            position, walked
        )))
    }

    /// All denoted ids in logical order
    pub fn ids(&self) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        for token in self.tokens()? {
            out.extend(token.first..=token.last);
        }
        Ok(out)
    }

    /// Minimal textual set covering `length` consecutive logical elements
    /// starting at 0-based `position`
    pub fn extract(&self, position: usize, length: usize) -> Result<FragmentIdSet> {
        if length < 1 {
            return Err(CubeError::OutOfRange(
                "extraction length must be at least 1".to_string(),
            ));
        }
        let total = self.count()?;
        if position + length > total {
            return Err(CubeError::OutOfRange(format!(
                "extraction [{}, {}) outside set of {} ids",
                position,
                position + length,
                total
            )));
        }

        let mut out: Vec<String> = Vec::new();
        let mut walked = 0usize;
        let mut remaining = length;
        for token in self.tokens()? {
            let token_count = token.count();
            if walked + token_count <= position {
                walked += token_count;
                continue;
            }
            let skip = position.saturating_sub(walked) as u64;
            let first = token.first + skip;
            let take = ((token.last - first + 1) as usize).min(remaining);
            let last = first + take as u64 - 1;
            out.push(render_token(first, last));
            remaining -= take;
            if remaining == 0 {
                break;
            }
            walked += token_count;
        }
        Ok(FragmentIdSet {
            text: out.join(";"),
        })
    }

    /// Remove one id, splitting or shrinking the token that holds it
    ///
    /// Only the containing token is re-synthesized; every other token keeps
    /// its original text. An absent id is a reported error rather than a
    /// silent no-op so callers can detect stale membership assumptions.
    pub fn remove(&mut self, id: u64) -> Result<()> {
        let mut out: Vec<String> = Vec::new();
        let mut found = false;
        for segment in self.text.split(';') {
            if segment.is_empty() {
                continue;
            }
            let token = parse_token(segment)?;
            if found || !token.contains(id) {
                out.push(segment.to_string());
                continue;
            }
            found = true;
            if id > token.first {
                out.push(render_token(token.first, id - 1));
            }
            if id < token.last {
                out.push(render_token(id + 1, token.last));
            }
        }
        if !found {
            return Err(CubeError::NotFound(format!(
                "fragment id {} is not a member of {:?}",
                id, self.text
            )));
        }
        self.text = out.join(";");
        Ok(())
    }
}

impl fmt::Display for FragmentIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text)
    }
}
