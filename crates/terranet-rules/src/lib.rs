//! Terranet connectivity rules
//!
//! A rule constrains which layer triples may be connected:
//!
//! ```text
//! ALLOW CONNECTS ANY
//! DENY CONNECTS Roads,Roads
//! ALLOW CONNECTS Pipes,Wells,Valves
//! ```
//!
//! Rules are parsed once into a typed representation; the canonical text is
//! kept for display and exact-text removal. Evaluation is a conjunction over
//! every matching rule: a single matching deny vetoes the connection, and at
//! least one matching allow must exist. An empty rule set denies everything
//! (fail closed).

use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_while1},
    character::complete::{char as pchar, multispace0, multispace1},
    combinator::{all_consuming, value},
    multi::separated_list1,
    sequence::{delimited, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Types
// ============================================================================

/// One position of a rule triple: either the `ANY` wildcard or a named layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerPattern {
    Any,
    Named(String),
}

impl LayerPattern {
    pub fn matches(&self, layer: &str) -> bool {
        match self {
            LayerPattern::Any => true,
            LayerPattern::Named(name) => name == layer,
        }
    }

    fn display(&self) -> &str {
        match self {
            LayerPattern::Any => "ANY",
            LayerPattern::Named(name) => name,
        }
    }
}

/// A parsed connectivity rule.
///
/// `connector` is `None` for the two-layer rule form, which leaves the
/// connector layer unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub allow: bool,
    pub source: LayerPattern,
    pub target: LayerPattern,
    pub connector: Option<LayerPattern>,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed rule `{text}`: {reason}")]
pub struct RuleParseError {
    pub text: String,
    pub reason: String,
}

impl Rule {
    /// Parse rule text: `("ALLOW"|"DENY") CONNECTS (ANY | src,tgt[,conn])`.
    pub fn parse(text: &str) -> Result<Rule, RuleParseError> {
        parse_rule(text)
    }

    /// Canonical text, regenerated from the parsed form.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True for the wholesale wildcard form (`... CONNECTS ANY`).
    pub fn is_accept_any(&self) -> bool {
        self.source == LayerPattern::Any
            && self.target == LayerPattern::Any
            && self.connector.is_none()
    }

    /// Whether this rule applies to the given layer triple. An empty
    /// connector layer only passes an unconstrained or `ANY` connector
    /// pattern.
    pub fn matches(&self, src_layer: &str, tgt_layer: &str, conn_layer: &str) -> bool {
        if !self.source.matches(src_layer) || !self.target.matches(tgt_layer) {
            return false;
        }
        match &self.connector {
            None | Some(LayerPattern::Any) => true,
            Some(LayerPattern::Named(name)) => !conn_layer.is_empty() && name == conn_layer,
        }
    }

    /// Named (non-wildcard) layers referenced by the rule, for existence
    /// validation.
    pub fn named_layers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for pattern in [Some(&self.source), Some(&self.target), self.connector.as_ref()]
            .into_iter()
            .flatten()
        {
            if let LayerPattern::Named(name) = pattern {
                out.push(name.as_str());
            }
        }
        out
    }

    fn from_parts(allow: bool, patterns: Vec<LayerPattern>) -> Rule {
        let verb = if allow { "ALLOW" } else { "DENY" };
        let (source, target, connector, body) = match patterns.as_slice() {
            [] => (LayerPattern::Any, LayerPattern::Any, None, "ANY".to_string()),
            parts => {
                let body = parts
                    .iter()
                    .map(LayerPattern::display)
                    .collect::<Vec<_>>()
                    .join(",");
                (
                    parts[0].clone(),
                    parts[1].clone(),
                    parts.get(2).cloned(),
                    body,
                )
            }
        };
        let text = format!("{verb} CONNECTS {body}");
        Rule {
            allow,
            source,
            target,
            connector,
            text,
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

// ============================================================================
// Parser
// ============================================================================

fn layer_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ',')(input)
}

fn verb(input: &str) -> IResult<&str, bool> {
    alt((
        value(true, tag_no_case("ALLOW")),
        value(false, tag_no_case("DENY")),
    ))(input)
}

fn layer_list(input: &str) -> IResult<&str, Vec<&str>> {
    separated_list1(
        delimited(multispace0, pchar(','), multispace0),
        layer_name,
    )(input)
}

fn parse_rule(text: &str) -> Result<Rule, RuleParseError> {
    let malformed = |reason: &str| RuleParseError {
        text: text.to_string(),
        reason: reason.to_string(),
    };

    let parsed = all_consuming(tuple((
        multispace0,
        verb,
        multispace1,
        tag_no_case("CONNECTS"),
        multispace1,
        layer_list,
        multispace0,
    )))(text);

    let (_, (_, allow, _, _, _, layers, _)) = parsed.map_err(|_| {
        malformed("expected `ALLOW|DENY CONNECTS ANY` or `ALLOW|DENY CONNECTS src,tgt[,conn]`")
    })?;

    let patterns: Vec<LayerPattern> = layers
        .iter()
        .map(|name| {
            if name.eq_ignore_ascii_case("ANY") {
                LayerPattern::Any
            } else {
                LayerPattern::Named((*name).to_string())
            }
        })
        .collect();

    match patterns.len() {
        1 => {
            if patterns[0] == LayerPattern::Any {
                Ok(Rule::from_parts(allow, Vec::new()))
            } else {
                Err(malformed("a single layer is only valid as `ANY`"))
            }
        }
        2 | 3 => Ok(Rule::from_parts(allow, patterns)),
        n => Err(malformed(&format!("expected 2 or 3 layers, got {n}"))),
    }
}

// ============================================================================
// RuleEngine
// ============================================================================

/// Ordered list of rules with deny-precedence evaluation.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Remove the first rule whose canonical text equals `text` exactly.
    /// Returns false when no rule matched.
    pub fn remove_text(&mut self, text: &str) -> bool {
        match self.rules.iter().position(|r| r.text() == text) {
            Some(i) => {
                self.rules.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Canonical texts of all rules, in order.
    pub fn texts(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.text().to_string()).collect()
    }

    /// Deny precedence: false on the first matching deny rule, true only if
    /// no deny matched and at least one allow rule covers the triple. Empty
    /// rule sets fail closed.
    pub fn can_connect(&self, src_layer: &str, tgt_layer: &str, conn_layer: &str) -> bool {
        let mut allowed = false;
        for rule in &self.rules {
            if rule.matches(src_layer, tgt_layer, conn_layer) {
                if !rule.allow {
                    return false;
                }
                allowed = true;
            }
        }
        allowed
    }
}
