//! Guard conditions over the run context.
//!
//! Conditions are written as small boolean expressions:
//!
//! ```text
//! event != 'pull_request' && startsWith(ref, 'refs/tags/')
//! !is_pull_request || vars.force_publish == 'true'
//! ```
//!
//! Supported forms:
//! - `a == b`, `a != b` where each side is a context field or a quoted string
//! - `&&`, `||`, `!` and parentheses
//! - `startsWith(a, b)`, `contains(a, b)`
//! - `true`, `false`, and a bare field (truthy when present, non-empty and not `false`)
//!
//! Fields: `event`, `ref`, `ref_name`, `ref_type`, `actor`, `is_tag`,
//! `is_pull_request`, `vars.<name>`.
//!
//! Evaluation is total. A comparison that touches an absent field is unknown,
//! unknown propagates through `!`, `&&` and `||` (three-valued), and an unknown
//! result at the top is treated as `false`.

use crate::run::RunContext;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset} in '{input}'")]
pub struct ConditionParseError {
    pub input: String,
    pub offset: usize,
    pub message: String,
}

/// A run-context field a condition can reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextField {
    Event,
    Ref,
    RefName,
    RefType,
    Actor,
    IsTag,
    IsPullRequest,
    Variable(String),
}

impl ContextField {
    fn parse(name: &str) -> Option<Self> {
        let field = match name {
            "event" | "event_name" => ContextField::Event,
            "ref" => ContextField::Ref,
            "ref_name" => ContextField::RefName,
            "ref_type" => ContextField::RefType,
            "actor" => ContextField::Actor,
            "is_tag" => ContextField::IsTag,
            "is_pull_request" => ContextField::IsPullRequest,
            other => {
                let var = other.strip_prefix("vars.")?;
                if var.is_empty() {
                    return None;
                }
                ContextField::Variable(var.to_string())
            }
        };
        Some(field)
    }
}

impl fmt::Display for ContextField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextField::Event => f.write_str("event"),
            ContextField::Ref => f.write_str("ref"),
            ContextField::RefName => f.write_str("ref_name"),
            ContextField::RefType => f.write_str("ref_type"),
            ContextField::Actor => f.write_str("actor"),
            ContextField::IsTag => f.write_str("is_tag"),
            ContextField::IsPullRequest => f.write_str("is_pull_request"),
            ContextField::Variable(name) => write!(f, "vars.{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Field(ContextField),
    Literal(String),
}

impl Operand {
    fn resolve(&self, ctx: &RunContext) -> Option<String> {
        match self {
            Operand::Field(field) => ctx.field(field),
            Operand::Literal(value) => Some(value.clone()),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Field(field) => write!(f, "{}", field),
            Operand::Literal(value) => write!(f, "'{}'", value.replace('\'', "\\'")),
        }
    }
}

/// Typed guard expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Bool(bool),
    Truthy(Operand),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
    StartsWith(Operand, Operand),
    Contains(Operand, Operand),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, ConditionParseError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            input,
            tokens,
            pos: 0,
        };
        let condition = parser.parse_or()?;
        if let Some((offset, token)) = parser.tokens.get(parser.pos) {
            return Err(parser.error_at(*offset, format!("unexpected {}", token.describe())));
        }
        Ok(condition)
    }

    /// Decide whether a job guarded by this condition may run.
    pub fn allows(&self, ctx: &RunContext) -> bool {
        self.eval(ctx).unwrap_or(false)
    }

    /// `event != '<kind>'`
    pub fn event_is_not(kind: &str) -> Self {
        Condition::Ne(
            Operand::Field(ContextField::Event),
            Operand::Literal(kind.to_string()),
        )
    }

    /// `startsWith(ref, '<prefix>')`
    pub fn ref_starts_with(prefix: &str) -> Self {
        Condition::StartsWith(
            Operand::Field(ContextField::Ref),
            Operand::Literal(prefix.to_string()),
        )
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Condition) -> Self {
        Condition::Or(Box::new(self), Box::new(other))
    }

    // None means "unknown": some referenced field was absent.
    fn eval(&self, ctx: &RunContext) -> Option<bool> {
        match self {
            Condition::Bool(value) => Some(*value),
            Condition::Truthy(operand) => {
                let value = operand.resolve(ctx)?;
                Some(!value.is_empty() && value != "false")
            }
            Condition::Eq(left, right) => Some(left.resolve(ctx)? == right.resolve(ctx)?),
            Condition::Ne(left, right) => Some(left.resolve(ctx)? != right.resolve(ctx)?),
            Condition::StartsWith(subject, prefix) => {
                Some(subject.resolve(ctx)?.starts_with(&prefix.resolve(ctx)?))
            }
            Condition::Contains(subject, needle) => {
                Some(subject.resolve(ctx)?.contains(&needle.resolve(ctx)?))
            }
            Condition::Not(inner) => inner.eval(ctx).map(|v| !v),
            Condition::And(left, right) => match (left.eval(ctx), right.eval(ctx)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            Condition::Or(left, right) => match (left.eval(ctx), right.eval(ctx)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }

    fn fmt_operand_of(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::And(..) | Condition::Or(..) => write!(f, "({})", self),
            _ => write!(f, "{}", self),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Bool(value) => write!(f, "{}", value),
            Condition::Truthy(operand) => write!(f, "{}", operand),
            Condition::Eq(left, right) => write!(f, "{} == {}", left, right),
            Condition::Ne(left, right) => write!(f, "{} != {}", left, right),
            Condition::StartsWith(subject, prefix) => {
                write!(f, "startsWith({}, {})", subject, prefix)
            }
            Condition::Contains(subject, needle) => write!(f, "contains({}, {})", subject, needle),
            Condition::Not(inner) => {
                f.write_str("!")?;
                match inner.as_ref() {
                    Condition::Bool(_) | Condition::Truthy(_) | Condition::Not(_) => {
                        write!(f, "{}", inner)
                    }
                    _ => write!(f, "({})", inner),
                }
            }
            Condition::And(left, right) => {
                left.fmt_operand_of(f)?;
                f.write_str(" && ")?;
                right.fmt_operand_of(f)
            }
            Condition::Or(left, right) => {
                left.fmt_operand_of(f)?;
                f.write_str(" || ")?;
                right.fmt_operand_of(f)
            }
        }
    }
}

impl FromStr for Condition {
    type Err = ConditionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::parse(s)
    }
}

impl TryFrom<String> for Condition {
    type Error = ConditionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Condition::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.to_string()
    }
}

impl serde::Serialize for Condition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Condition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Condition::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Str(value) => format!("string '{}'", value),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::EqEq => "'=='".to_string(),
            Token::NotEq => "'!='".to_string(),
            Token::AndAnd => "'&&'".to_string(),
            Token::OrOr => "'||'".to_string(),
            Token::Bang => "'!'".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ConditionParseError> {
    let err = |offset: usize, message: &str| ConditionParseError {
        input: input.to_string(),
        offset,
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' => {
                chars.next();
                let token = match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    _ => Token::Comma,
                };
                tokens.push((offset, token));
            }
            '=' | '!' | '&' | '|' => {
                chars.next();
                let next = chars.peek().map(|&(_, n)| n);
                let token = match (c, next) {
                    ('=', Some('=')) => Token::EqEq,
                    ('!', Some('=')) => Token::NotEq,
                    ('&', Some('&')) => Token::AndAnd,
                    ('|', Some('|')) => Token::OrOr,
                    ('!', _) => {
                        tokens.push((offset, Token::Bang));
                        continue;
                    }
                    _ => return Err(err(offset, "incomplete operator")),
                };
                chars.next();
                tokens.push((offset, token));
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        ch if ch == quote => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(err(offset, "unterminated string"));
                }
                tokens.push((offset, Token::Str(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-') {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((offset, Token::Ident(name)));
            }
            _ => return Err(err(offset, &format!("unexpected character '{}'", c))),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser<'_> {
    fn error_at(&self, offset: usize, message: String) -> ConditionParseError {
        ConditionParseError {
            input: self.input.to_string(),
            offset,
            message,
        }
    }

    fn error_here(&self, message: &str) -> ConditionParseError {
        let offset = self
            .tokens
            .get(self.pos)
            .map(|(offset, _)| *offset)
            .unwrap_or(self.input.len());
        self.error_at(offset, message.to_string())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, token)| token)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionParseError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error_here(&format!("expected {}", expected.describe())))
        }
    }

    fn parse_or(&mut self) -> Result<Condition, ConditionParseError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::OrOr) {
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ConditionParseError> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::AndAnd) {
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition, ConditionParseError> {
        if self.eat(&Token::Bang) {
            let inner = self.parse_unary()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, ConditionParseError> {
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }

        if let Some(Token::Ident(name)) = self.peek().cloned() {
            if matches!(self.tokens.get(self.pos + 1), Some((_, Token::LParen))) {
                return self.parse_call(&name);
            }
            if matches!(name.as_str(), "true" | "false") && !self.comparison_follows(1) {
                self.pos += 1;
                return Ok(Condition::Bool(name == "true"));
            }
        }

        let left = self.parse_operand()?;
        if self.eat(&Token::EqEq) {
            let right = self.parse_operand()?;
            return Ok(Condition::Eq(left, right));
        }
        if self.eat(&Token::NotEq) {
            let right = self.parse_operand()?;
            return Ok(Condition::Ne(left, right));
        }
        Ok(Condition::Truthy(left))
    }

    fn comparison_follows(&self, lookahead: usize) -> bool {
        matches!(
            self.tokens.get(self.pos + lookahead),
            Some((_, Token::EqEq)) | Some((_, Token::NotEq))
        )
    }

    fn parse_call(&mut self, name: &str) -> Result<Condition, ConditionParseError> {
        let offset = self.tokens[self.pos].0;
        self.pos += 1;
        self.expect(Token::LParen)?;
        let subject = self.parse_operand()?;
        self.expect(Token::Comma)?;
        let argument = self.parse_operand()?;
        self.expect(Token::RParen)?;

        match name {
            "startsWith" => Ok(Condition::StartsWith(subject, argument)),
            "contains" => Ok(Condition::Contains(subject, argument)),
            other => Err(self.error_at(offset, format!("unknown function '{}'", other))),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionParseError> {
        let Some((offset, token)) = self.tokens.get(self.pos).cloned() else {
            return Err(self.error_here("expected a field or string"));
        };
        self.pos += 1;
        match token {
            Token::Str(value) => Ok(Operand::Literal(value)),
            Token::Ident(name) if name == "true" || name == "false" => Ok(Operand::Literal(name)),
            Token::Ident(name) => ContextField::parse(&name)
                .map(Operand::Field)
                .ok_or_else(|| self.error_at(offset, format!("unknown field '{}'", name))),
            other => Err(self.error_at(
                offset,
                format!("expected a field or string, found {}", other.describe()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::EventKind;

    fn ctx(event: EventKind, git_ref: &str) -> RunContext {
        RunContext::new(event, git_ref)
    }

    #[test]
    fn test_not_pull_request() {
        let cond = Condition::parse("event != 'pull_request'").unwrap();
        assert!(cond.allows(&ctx(EventKind::Push, "refs/heads/main")));
        assert!(!cond.allows(&ctx(EventKind::PullRequest, "refs/pull/7/merge")));
    }

    #[test]
    fn test_tag_prefix_and_event() {
        let cond =
            Condition::parse("startsWith(ref, 'refs/tags/') && event != 'pull_request'").unwrap();
        assert!(cond.allows(&ctx(EventKind::Tag, "refs/tags/v1.2.0")));
        assert!(!cond.allows(&ctx(EventKind::Push, "refs/heads/main")));
    }

    #[test]
    fn test_precedence_and_grouping() {
        let cond = Condition::parse("is_tag || event == 'push' && ref == 'refs/heads/main'").unwrap();
        // && binds tighter than ||
        assert!(cond.allows(&ctx(EventKind::Tag, "refs/tags/v1")));
        assert!(cond.allows(&ctx(EventKind::Push, "refs/heads/main")));
        assert!(!cond.allows(&ctx(EventKind::Push, "refs/heads/dev")));

        let grouped = Condition::parse("(is_tag || event == 'push') && !is_pull_request").unwrap();
        assert!(grouped.allows(&ctx(EventKind::Push, "refs/heads/dev")));
    }

    #[test]
    fn test_absent_field_is_false_not_error() {
        let context = ctx(EventKind::Push, "refs/heads/main");
        assert!(!Condition::parse("actor == 'release-bot'").unwrap().allows(&context));
        assert!(!Condition::parse("actor != 'release-bot'").unwrap().allows(&context));
        assert!(!Condition::parse("!(actor == 'release-bot')").unwrap().allows(&context));
        assert!(!Condition::parse("vars.channel == 'stable'").unwrap().allows(&context));
    }

    #[test]
    fn test_unknown_does_not_mask_known_result() {
        let context = ctx(EventKind::Push, "refs/heads/main");
        let or = Condition::parse("actor == 'bot' || event == 'push'").unwrap();
        assert!(or.allows(&context));
        let and = Condition::parse("actor == 'bot' && event == 'pull_request'").unwrap();
        assert!(!and.allows(&context));
    }

    #[test]
    fn test_variables() {
        let mut context = ctx(EventKind::Push, "refs/heads/main");
        context
            .variables
            .insert("channel".to_string(), "stable".to_string());
        assert!(Condition::parse("vars.channel == 'stable'").unwrap().allows(&context));
        assert!(Condition::parse("contains(ref, 'main')").unwrap().allows(&context));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Condition::parse("event ==").is_err());
        assert!(Condition::parse("github.token == 'x'").is_err());
        assert!(Condition::parse("endsWith(ref, 'x')").is_err());
        assert!(Condition::parse("event == 'push' &").is_err());
        assert!(Condition::parse("'unterminated").is_err());
        assert!(Condition::parse("(event == 'push'").is_err());
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        let source = "!(is_tag && event == 'push') || startsWith(ref, 'refs/tags/')";
        let cond = Condition::parse(source).unwrap();
        let reparsed = Condition::parse(&cond.to_string()).unwrap();
        assert_eq!(cond, reparsed);
    }

    #[test]
    fn test_literal_booleans() {
        let context = ctx(EventKind::Push, "refs/heads/main");
        assert!(Condition::parse("true").unwrap().allows(&context));
        assert!(!Condition::parse("false").unwrap().allows(&context));
        assert!(!Condition::parse("is_tag == true").unwrap().allows(&context));
    }
}
