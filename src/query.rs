//! Search query expressions over the metadata index.
//!
//! A [`SearchQuery`] is an immutable tree of text leaves combined with AND,
//! OR and NOT. Queries are validated and tokenized the same way the index
//! tokenizes metadata, then translated into a parameterized SQL filter.
//! The tree also has a canonical textual form (`Display`) that parses back
//! into the same tree (`FromStr`).

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ScrnaError;

static EXACT_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}_-]+").expect("valid token pattern"));
static PARTIAL_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}%_-]+").expect("valid token pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    /// Match `text` against the tokens of `field`, or of any field when
    /// `field` is `None`. Partial leaves treat `%` as a wildcard.
    Text {
        field: Option<String>,
        text: String,
        partial: bool,
    },
    And(Vec<SearchQuery>),
    Or(Vec<SearchQuery>),
    Not(Box<SearchQuery>),
}

/// Builds a text leaf. `field = None` matches any indexed field.
pub fn define_text_query(text: &str, field: Option<&str>, partial: bool) -> SearchQuery {
    SearchQuery::Text {
        field: field.map(str::to_string),
        text: text.to_string(),
        partial,
    }
}

/// A WHERE-clause fragment plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlFilter {
    pub clause: String,
    pub parameters: Vec<String>,
}

impl SearchQuery {
    pub fn and(children: Vec<SearchQuery>) -> Self {
        SearchQuery::And(children)
    }

    pub fn or(children: Vec<SearchQuery>) -> Self {
        SearchQuery::Or(children)
    }

    pub fn negate(child: SearchQuery) -> Self {
        SearchQuery::Not(Box::new(child))
    }

    pub fn validate(&self) -> Result<(), ScrnaError> {
        match self {
            SearchQuery::Text { field, text, .. } => {
                if text.trim().is_empty() {
                    return Err(ScrnaError::InvalidQuery(
                        "text query must not be empty".to_string(),
                    ));
                }
                if field.as_deref().is_some_and(|field| field.trim().is_empty()) {
                    return Err(ScrnaError::InvalidQuery(
                        "field name must not be empty".to_string(),
                    ));
                }
                Ok(())
            }
            SearchQuery::And(children) | SearchQuery::Or(children) => {
                if children.is_empty() {
                    return Err(ScrnaError::InvalidQuery(format!(
                        "{} clause has no children",
                        self.operator_name()
                    )));
                }
                children.iter().try_for_each(SearchQuery::validate)
            }
            SearchQuery::Not(child) => child.validate(),
        }
    }

    /// Validates the tree and splits every leaf into index tokens.
    ///
    /// A leaf whose text holds several tokens becomes an AND of
    /// single-token leaves with the same field and partial flag.
    pub fn sanitize(&self) -> Result<SearchQuery, ScrnaError> {
        self.validate()?;
        self.sanitize_node()
    }

    fn sanitize_node(&self) -> Result<SearchQuery, ScrnaError> {
        match self {
            SearchQuery::Text {
                field,
                text,
                partial,
            } => {
                let tokens = tokenize(text, *partial);
                if tokens.is_empty() {
                    return Err(ScrnaError::InvalidQuery(format!(
                        "query text {text:?} contains no searchable tokens"
                    )));
                }
                let mut leaves = tokens
                    .into_iter()
                    .map(|token| SearchQuery::Text {
                        field: field.as_ref().map(|field| field.trim().to_string()),
                        text: token,
                        partial: *partial,
                    })
                    .collect::<Vec<_>>();
                if leaves.len() == 1 {
                    return Ok(leaves.remove(0));
                }
                Ok(SearchQuery::And(leaves))
            }
            SearchQuery::And(children) => Ok(SearchQuery::And(
                children
                    .iter()
                    .map(SearchQuery::sanitize_node)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            SearchQuery::Or(children) => Ok(SearchQuery::Or(
                children
                    .iter()
                    .map(SearchQuery::sanitize_node)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            SearchQuery::Not(child) => Ok(SearchQuery::Not(Box::new(child.sanitize_node()?))),
        }
    }

    /// Translates the query into a filter on `pid_column` against the
    /// `links`/`tokens`/`fields` tables of the metadata index.
    pub fn to_sql_filter(&self, pid_column: &str) -> Result<SqlFilter, ScrnaError> {
        let sanitized = self.sanitize()?;
        let mut parameters = Vec::new();
        let clause = build_clause(&sanitized, pid_column, &mut parameters);
        Ok(SqlFilter { clause, parameters })
    }

    fn operator_name(&self) -> &'static str {
        match self {
            SearchQuery::Text { .. } => "TEXT",
            SearchQuery::And(_) => "AND",
            SearchQuery::Or(_) => "OR",
            SearchQuery::Not(_) => "NOT",
        }
    }
}

fn tokenize(text: &str, partial: bool) -> Vec<String> {
    let separators = if partial {
        &*PARTIAL_SEPARATORS
    } else {
        &*EXACT_SEPARATORS
    };
    separators
        .split(&text.to_lowercase())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn escape_like(token: &str) -> String {
    token.replace('\\', "\\\\").replace('_', "\\_")
}

fn build_clause(query: &SearchQuery, pid_column: &str, parameters: &mut Vec<String>) -> String {
    match query {
        SearchQuery::And(children) => {
            let parts = children
                .iter()
                .map(|child| build_clause(child, pid_column, parameters))
                .collect::<Vec<_>>();
            format!("({})", parts.join(" AND "))
        }
        SearchQuery::Or(children) => {
            let parts = children
                .iter()
                .map(|child| build_clause(child, pid_column, parameters))
                .collect::<Vec<_>>();
            format!("({})", parts.join(" OR "))
        }
        SearchQuery::Not(child) => format!("NOT {}", build_clause(child, pid_column, parameters)),
        SearchQuery::Text {
            field,
            text,
            partial,
        } => {
            let matcher = if *partial {
                parameters.push(escape_like(text));
                "LIKE ? ESCAPE '\\'"
            } else {
                parameters.push(text.clone());
                "= ?"
            };
            match field {
                None => format!(
                    "{pid_column} IN (SELECT links.pid FROM links \
                     LEFT JOIN tokens ON tokens.tid = links.tid \
                     WHERE tokens.token {matcher})"
                ),
                Some(field) => {
                    parameters.push(field.clone());
                    format!(
                        "{pid_column} IN (SELECT links.pid FROM links \
                         LEFT JOIN tokens ON tokens.tid = links.tid \
                         LEFT JOIN fields ON fields.fid = links.fid \
                         WHERE tokens.token {matcher} AND fields.field = ?)"
                    )
                }
            }
        }
    }
}

impl From<&str> for SearchQuery {
    fn from(text: &str) -> Self {
        define_text_query(text, None, false)
    }
}

impl From<String> for SearchQuery {
    fn from(text: String) -> Self {
        SearchQuery::Text {
            field: None,
            text,
            partial: false,
        }
    }
}

impl From<&SearchQuery> for SearchQuery {
    fn from(query: &SearchQuery) -> Self {
        query.clone()
    }
}

impl BitAnd for SearchQuery {
    type Output = SearchQuery;

    fn bitand(self, rhs: SearchQuery) -> SearchQuery {
        SearchQuery::And(vec![self, rhs])
    }
}

impl BitAnd for &SearchQuery {
    type Output = SearchQuery;

    fn bitand(self, rhs: &SearchQuery) -> SearchQuery {
        SearchQuery::And(vec![self.clone(), rhs.clone()])
    }
}

impl BitOr for SearchQuery {
    type Output = SearchQuery;

    fn bitor(self, rhs: SearchQuery) -> SearchQuery {
        SearchQuery::Or(vec![self, rhs])
    }
}

impl BitOr for &SearchQuery {
    type Output = SearchQuery;

    fn bitor(self, rhs: &SearchQuery) -> SearchQuery {
        SearchQuery::Or(vec![self.clone(), rhs.clone()])
    }
}

impl Not for SearchQuery {
    type Output = SearchQuery;

    fn not(self) -> SearchQuery {
        SearchQuery::Not(Box::new(self))
    }
}

impl Not for &SearchQuery {
    type Output = SearchQuery;

    fn not(self) -> SearchQuery {
        SearchQuery::Not(Box::new(self.clone()))
    }
}

impl fmt::Display for SearchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchQuery::Text {
                field,
                text,
                partial,
            } => {
                if *partial {
                    write!(f, "~")?;
                }
                if let Some(field) = field {
                    write_field(f, field)?;
                    write!(f, ":")?;
                }
                write_quoted(f, text)
            }
            SearchQuery::And(children) | SearchQuery::Or(children) => {
                let op = self.operator_name();
                if children.len() == 1 {
                    return write!(f, "{op}({})", children[0]);
                }
                write!(f, "(")?;
                for (idx, child) in children.iter().enumerate() {
                    if idx > 0 {
                        write!(f, " {op} ")?;
                    }
                    write!(f, "{child}")?;
                }
                write!(f, ")")
            }
            SearchQuery::Not(child) => write!(f, "NOT {child}"),
        }
    }
}

fn write_field(f: &mut fmt::Formatter<'_>, field: &str) -> fmt::Result {
    let is_bare = !field.is_empty()
        && !matches!(field, "AND" | "OR" | "NOT")
        && field.chars().all(is_bare_char);
    if is_bare {
        write!(f, "{field}")
    } else {
        write_quoted(f, field)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in value.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            other => write!(f, "{other}")?,
        }
    }
    write!(f, "\"")
}

fn is_bare_char(ch: char) -> bool {
    !ch.is_whitespace() && !matches!(ch, '(' | ')' | '"' | ':' | '~')
}

impl FromStr for SearchQuery {
    type Err = ScrnaError;

    /// Parses the canonical form, e.g.
    /// `genome:GRCm38 AND (~"neuro%" OR ~pancrea%)`.
    /// Precedence is NOT over AND over OR.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            position: 0,
            end: input.len(),
        };
        let query = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ScrnaError::QuerySyntax {
                offset: token.offset,
                message: "expected AND, OR or end of query".to_string(),
            });
        }
        query.validate()?;
        Ok(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Open,
    Close,
    Colon,
    Tilde,
    Word { value: String, quoted: bool },
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn lex(input: &str) -> Result<Vec<Token>, ScrnaError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        let kind = match ch {
            '(' => {
                chars.next();
                TokenKind::Open
            }
            ')' => {
                chars.next();
                TokenKind::Close
            }
            ':' => {
                chars.next();
                TokenKind::Colon
            }
            '~' => {
                chars.next();
                TokenKind::Tilde
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(ScrnaError::QuerySyntax {
                        offset,
                        message: "unterminated quoted string".to_string(),
                    });
                }
                TokenKind::Word {
                    value,
                    quoted: true,
                }
            }
            _ => {
                let mut value = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if !is_bare_char(ch) {
                        break;
                    }
                    value.push(ch);
                    chars.next();
                }
                TokenKind::Word {
                    value,
                    quoted: false,
                }
            }
        };
        tokens.push(Token { kind, offset });
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn offset(&self) -> usize {
        self.peek().map(|token| token.offset).unwrap_or(self.end)
    }

    fn next_is_keyword(&self, keyword: &str) -> bool {
        self.keyword_at(self.position, keyword)
    }

    fn keyword_at(&self, position: usize, keyword: &str) -> bool {
        matches!(
            self.tokens.get(position),
            Some(Token { kind: TokenKind::Word { value, quoted: false }, .. }) if value == keyword
        )
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ScrnaError> {
        match self.peek() {
            Some(token) if token.kind == kind => {
                self.position += 1;
                Ok(())
            }
            _ => Err(ScrnaError::QuerySyntax {
                offset: self.offset(),
                message: format!("expected {what}"),
            }),
        }
    }

    fn parse_or(&mut self) -> Result<SearchQuery, ScrnaError> {
        let mut children = vec![self.parse_and()?];
        while self.next_is_keyword("OR") {
            self.position += 1;
            children.push(self.parse_and()?);
        }
        if children.len() == 1 {
            return Ok(children.remove(0));
        }
        Ok(SearchQuery::Or(children))
    }

    fn parse_and(&mut self) -> Result<SearchQuery, ScrnaError> {
        let mut children = vec![self.parse_unary()?];
        while self.next_is_keyword("AND") {
            self.position += 1;
            children.push(self.parse_unary()?);
        }
        if children.len() == 1 {
            return Ok(children.remove(0));
        }
        Ok(SearchQuery::And(children))
    }

    fn parse_unary(&mut self) -> Result<SearchQuery, ScrnaError> {
        if self.next_is_keyword("NOT") {
            self.position += 1;
            return Ok(SearchQuery::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<SearchQuery, ScrnaError> {
        let single_child = ["AND", "OR"].into_iter().find(|keyword| {
            self.keyword_at(self.position, keyword)
                && matches!(
                    self.tokens.get(self.position + 1),
                    Some(Token {
                        kind: TokenKind::Open,
                        ..
                    })
                )
        });
        if let Some(keyword) = single_child {
            self.position += 2;
            let child = self.parse_or()?;
            self.expect(TokenKind::Close, "')'")?;
            return Ok(if keyword == "AND" {
                SearchQuery::And(vec![child])
            } else {
                SearchQuery::Or(vec![child])
            });
        }

        match self.peek().map(|token| token.kind.clone()) {
            Some(TokenKind::Open) => {
                self.position += 1;
                let inner = self.parse_or()?;
                self.expect(TokenKind::Close, "')'")?;
                Ok(inner)
            }
            Some(_) => self.parse_leaf(),
            None => Err(ScrnaError::QuerySyntax {
                offset: self.end,
                message: "unexpected end of query".to_string(),
            }),
        }
    }

    fn parse_leaf(&mut self) -> Result<SearchQuery, ScrnaError> {
        let partial = matches!(
            self.peek(),
            Some(Token {
                kind: TokenKind::Tilde,
                ..
            })
        );
        if partial {
            self.position += 1;
        }
        let first = self.parse_word()?;
        let is_field = matches!(
            self.peek(),
            Some(Token {
                kind: TokenKind::Colon,
                ..
            })
        );
        if is_field {
            self.position += 1;
            let text = self.parse_word()?;
            return Ok(SearchQuery::Text {
                field: Some(first),
                text,
                partial,
            });
        }
        Ok(SearchQuery::Text {
            field: None,
            text: first,
            partial,
        })
    }

    fn parse_word(&mut self) -> Result<String, ScrnaError> {
        let offset = self.offset();
        match self.peek().map(|token| token.kind.clone()) {
            Some(TokenKind::Word { value, quoted }) => {
                if !quoted && matches!(value.as_str(), "AND" | "OR" | "NOT") {
                    return Err(ScrnaError::QuerySyntax {
                        offset,
                        message: format!("unexpected operator {value}"),
                    });
                }
                self.position += 1;
                Ok(value)
            }
            _ => Err(ScrnaError::QuerySyntax {
                offset,
                message: "expected search text".to_string(),
            }),
        }
    }
}
