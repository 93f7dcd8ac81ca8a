//! Path pattern language.
//!
//! `%Y`, `%m`, `%d` expand to the zero-padded year, month and day; `%%` is a
//! literal percent sign. `{category}`, `{author}`, `{basename}` and `{id}`
//! expand to content values. Everything else is literal text.

use std::fmt;
use std::str::FromStr;

use regex::Regex;

use super::ResolveError;
use crate::db::DatabaseError;

const TOKEN_PATTERN: &str = r"%(.?)|\{([^{}]*)(\}?)";

/// Placeholder kinds recorded as FileInfo contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextType {
    Year,
    Month,
    Day,
    Category,
    Author,
}

impl ContextType {
    /// Single-letter code used in context signatures.
    pub fn letter(&self) -> char {
        match self {
            Self::Year => 'Y',
            Self::Month => 'M',
            Self::Day => 'D',
            Self::Category => 'C',
            Self::Author => 'A',
        }
    }

    pub fn token(&self) -> Token {
        match self {
            Self::Year => Token::Year,
            Self::Month => Token::Month,
            Self::Day => Token::Day,
            Self::Category => Token::Category,
            Self::Author => Token::Author,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Category => "category",
            Self::Author => "author",
        }
    }
}

impl FromStr for ContextType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            "category" => Ok(Self::Category),
            "author" => Ok(Self::Author),
            other => Err(DatabaseError::InvalidValue {
                column: "fileinfo_contexts.context_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Year,
    Month,
    Day,
    Category,
    Author,
    Basename,
    Id,
}

impl Token {
    pub fn context_type(&self) -> Option<ContextType> {
        match self {
            Self::Year => Some(ContextType::Year),
            Self::Month => Some(ContextType::Month),
            Self::Day => Some(ContextType::Day),
            Self::Category => Some(ContextType::Category),
            Self::Author => Some(ContextType::Author),
            Self::Literal(_) | Self::Basename | Self::Id => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(text) => f.write_str(text),
            Self::Year => f.write_str("%Y"),
            Self::Month => f.write_str("%m"),
            Self::Day => f.write_str("%d"),
            Self::Category => f.write_str("{category}"),
            Self::Author => f.write_str("{author}"),
            Self::Basename => f.write_str("{basename}"),
            Self::Id => f.write_str("{id}"),
        }
    }
}

/// A parsed mapping pattern: tokens paired with their character offset in the
/// source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    tokens: Vec<(usize, Token)>,
}

impl PathPattern {
    pub fn parse(source: &str) -> Result<Self, ResolveError> {
        let re = Regex::new(TOKEN_PATTERN)
            .map_err(|e| ResolveError::invalid(source, e.to_string()))?;

        let mut tokens = Vec::new();
        let mut last = 0;

        for caps in re.captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };

            if whole.start() > last {
                let offset = source[..last].chars().count();
                let text = source[last..whole.start()].to_string();
                tokens.push((offset, Token::Literal(text)));
            }

            let position = source[..whole.start()].chars().count();
            let token = if let Some(directive) = caps.get(1) {
                match directive.as_str() {
                    "Y" => Token::Year,
                    "m" => Token::Month,
                    "d" => Token::Day,
                    "%" => Token::Literal("%".to_string()),
                    "" => {
                        return Err(ResolveError::invalid(
                            source,
                            "dangling '%' at end of pattern",
                        ))
                    }
                    other => {
                        return Err(ResolveError::invalid(
                            source,
                            format!("unknown date placeholder '%{}'", other),
                        ))
                    }
                }
            } else {
                let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
                let closed = caps.get(3).is_some_and(|m| !m.as_str().is_empty());
                if !closed {
                    return Err(ResolveError::invalid(
                        source,
                        format!("unclosed '{{' at position {}", position),
                    ));
                }
                match name {
                    "category" => Token::Category,
                    "author" => Token::Author,
                    "basename" => Token::Basename,
                    "id" => Token::Id,
                    other => {
                        return Err(ResolveError::invalid(
                            source,
                            format!("unknown placeholder '{{{}}}'", other),
                        ))
                    }
                }
            };

            tokens.push((position, token));
            last = whole.end();
        }

        if last < source.len() {
            let offset = source[..last].chars().count();
            tokens.push((offset, Token::Literal(source[last..].to_string())));
        }

        Ok(Self {
            source: source.to_string(),
            tokens,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().map(|(_, token)| token)
    }

    /// First occurrence of each context placeholder, by ascending position.
    pub fn context_types(&self) -> Vec<(ContextType, usize)> {
        let mut seen: Vec<(ContextType, usize)> = Vec::new();
        for (position, token) in &self.tokens {
            if let Some(context_type) = token.context_type() {
                if !seen.iter().any(|(t, _)| *t == context_type) {
                    seen.push((context_type, *position));
                }
            }
        }
        seen.sort_by_key(|(_, position)| *position);
        seen
    }

    pub fn uses(&self, context_type: ContextType) -> bool {
        self.tokens
            .iter()
            .any(|(_, token)| token.context_type() == Some(context_type))
    }

    /// Compact context signature, e.g. "YMC".
    pub fn signature(&self) -> String {
        self.context_types()
            .iter()
            .map(|(context_type, _)| context_type.letter())
            .collect()
    }
}
