// SPDX-FileCopyrightText: 2026 Canopy contributors
// SPDX-License-Identifier: MIT

//! Recursive descent parser for query paths.
//!
//! Grammar (whitespace is allowed inside predicates):
//!
//! ```text
//! query      := ("//" | "/") steps ("/ancestor::" steps)?
//! steps      := step ("/" step)*
//! step       := name predicate*
//! predicate  := "[" (conditions | "text()" "=" string | "contains(@" name "," string ")") "]"
//! conditions := "@" name op literal (("and" | "or") "@" name op literal)*
//! op         := "=" | ">" | "<" | ">=" | "<="
//! literal    := string | integer
//! ```

use super::{
    BooleanOperator, ComparisonOperator, ComparisonValue, ContainsFunctionCondition,
    LeafCondition, PathError, PathQuery, PrefixType, TextFunctionCondition, quote,
};

const ANCESTOR_AXIS: &str = "ancestor::";

#[derive(Debug)]
enum Predicate {
    Conditions(Vec<LeafCondition>, Vec<BooleanOperator>),
    Text(String),
    Contains(String, String),
}

#[derive(Debug)]
struct Step {
    name: String,
    predicates: Vec<Predicate>,
}

impl Step {
    fn normalized(&self) -> String {
        let mut out = self.name.clone();
        for predicate in &self.predicates {
            match predicate {
                Predicate::Conditions(conditions, operators) => {
                    out.push('[');
                    out.push_str(&join_conditions(conditions, operators));
                    out.push(']');
                }
                Predicate::Text(value) => {
                    out.push_str(&format!("[text()={}]", quote(value)));
                }
                Predicate::Contains(leaf, value) => {
                    out.push_str(&format!("[contains(@{leaf},{})]", quote(value)));
                }
            }
        }
        out
    }
}

fn join_conditions(conditions: &[LeafCondition], operators: &[BooleanOperator]) -> String {
    let mut out = String::new();
    for (i, condition) in conditions.iter().enumerate() {
        if i > 0 {
            out.push_str(&format!(" {} ", operators[i - 1]));
        }
        out.push_str(&condition.to_string());
    }
    out
}

fn join_steps(steps: &[Step]) -> String {
    steps
        .iter()
        .map(Step::normalized)
        .collect::<Vec<_>>()
        .join("/")
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> PathError {
        PathError::Syntax {
            path: self.input.to_string(),
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), PathError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{token}' at offset {}", self.pos)))
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// An identifier with an optional `module:` prefix.
    fn name(&mut self) -> Result<String, PathError> {
        let start = self.pos;
        self.identifier()?;
        if self.peek() == Some(b':')
            && self
                .input
                .as_bytes()
                .get(self.pos + 1)
                .is_some_and(|b| is_identifier_start(*b))
        {
            self.pos += 1;
            self.identifier()?;
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn identifier(&mut self) -> Result<(), PathError> {
        match self.peek() {
            Some(b) if is_identifier_start(b) => self.pos += 1,
            _ => return Err(self.error(format!("expected a name at offset {}", self.pos))),
        }
        while self.peek().is_some_and(is_identifier_char) {
            self.pos += 1;
        }
        Ok(())
    }

    fn string_literal(&mut self) -> Result<String, PathError> {
        let quote = match self.peek() {
            Some(q @ (b'\'' | b'"')) => q as char,
            _ => return Err(self.error(format!("expected a quoted string at offset {}", self.pos))),
        };
        self.pos += 1;
        let Some(len) = self.rest().find(quote) else {
            return Err(self.error("unterminated string"));
        };
        let value = self.rest()[..len].to_string();
        self.pos += len + 1;
        Ok(value)
    }

    fn integer(&mut self) -> Result<i64, PathError> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|_| self.error(format!("expected a value at offset {start}")))
    }

    fn literal(&mut self) -> Result<ComparisonValue, PathError> {
        match self.peek() {
            Some(b'\'' | b'"') => self.string_literal().map(ComparisonValue::Text),
            _ => self.integer().map(ComparisonValue::Integer),
        }
    }

    fn operator(&mut self) -> Result<ComparisonOperator, PathError> {
        let operator = if self.eat(">=") {
            ComparisonOperator::Ge
        } else if self.eat("<=") {
            ComparisonOperator::Le
        } else if self.eat("=") {
            ComparisonOperator::Eq
        } else if self.eat(">") {
            ComparisonOperator::Gt
        } else if self.eat("<") {
            ComparisonOperator::Lt
        } else {
            return Err(self.error(format!("expected a comparison at offset {}", self.pos)));
        };
        Ok(operator)
    }

    fn predicate(&mut self) -> Result<Predicate, PathError> {
        self.expect("[")?;
        self.skip_whitespace();
        let predicate = if self.eat("text()") {
            self.skip_whitespace();
            self.expect("=")?;
            self.skip_whitespace();
            Predicate::Text(self.string_literal()?)
        } else if self.eat("contains(") {
            self.skip_whitespace();
            self.expect("@")?;
            let leaf = self.name()?;
            self.skip_whitespace();
            self.expect(",")?;
            self.skip_whitespace();
            let value = self.string_literal()?;
            self.skip_whitespace();
            self.expect(")")?;
            Predicate::Contains(leaf, value)
        } else {
            let mut conditions = Vec::new();
            let mut operators = Vec::new();
            loop {
                self.expect("@")?;
                let name = self.name()?;
                self.skip_whitespace();
                let operator = self.operator()?;
                self.skip_whitespace();
                let value = self.literal()?;
                conditions.push(LeafCondition {
                    name,
                    operator,
                    value,
                });
                self.skip_whitespace();
                if self.peek() == Some(b']') {
                    break;
                }
                if self.eat("and") {
                    operators.push(BooleanOperator::And);
                } else if self.eat("or") {
                    operators.push(BooleanOperator::Or);
                } else {
                    return Err(self.error(format!("expected 'and', 'or' or ']' at offset {}", self.pos)));
                }
                self.skip_whitespace();
            }
            Predicate::Conditions(conditions, operators)
        };
        self.skip_whitespace();
        self.expect("]")?;
        Ok(predicate)
    }

    fn step(&mut self) -> Result<Step, PathError> {
        let name = self.name()?;
        let mut predicates = Vec::new();
        while self.peek() == Some(b'[') {
            predicates.push(self.predicate()?);
        }
        Ok(Step { name, predicates })
    }

    /// Parse steps until the end of input or the ancestor axis.
    fn steps(&mut self, allow_axis: bool) -> Result<(Vec<Step>, bool), PathError> {
        let mut steps = Vec::new();
        loop {
            if allow_axis && !steps.is_empty() && self.eat(ANCESTOR_AXIS) {
                return Ok((steps, true));
            }
            steps.push(self.step()?);
            if self.at_end() {
                return Ok((steps, false));
            }
            self.expect("/")?;
        }
    }
}

fn is_identifier_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_identifier_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

/// List key predicates on intermediate steps may only be `=` joined by `and`.
fn check_list_keys(parser: &Parser<'_>, step: &Step) -> Result<(), PathError> {
    for predicate in &step.predicates {
        match predicate {
            Predicate::Conditions(conditions, operators) => {
                if operators.iter().any(|op| *op != BooleanOperator::And)
                    || conditions
                        .iter()
                        .any(|c| c.operator != ComparisonOperator::Eq)
                {
                    return Err(parser.error(format!(
                        "step '{}' may only use '=' list keys joined by 'and'",
                        step.name
                    )));
                }
            }
            Predicate::Text(_) | Predicate::Contains(..) => {
                return Err(parser.error(format!(
                    "functions are only allowed on the final step, not on '{}'",
                    step.name
                )));
            }
        }
    }
    Ok(())
}

pub(super) fn parse(input: &str) -> Result<PathQuery, PathError> {
    let mut parser = Parser::new(input);

    let prefix_type = if parser.eat("//") {
        PrefixType::Descendant
    } else if parser.eat("/") {
        PrefixType::Absolute
    } else {
        return Err(parser.error("path must start with '/' or '//'"));
    };

    let (mut steps, has_axis) = parser.steps(true)?;
    let ancestor_steps = if has_axis {
        let (ancestor, _) = parser.steps(false)?;
        for step in &ancestor {
            check_list_keys(&parser, step)?;
        }
        Some(ancestor)
    } else {
        None
    };

    let mut leaf_conditions = Vec::new();
    let mut boolean_operators = Vec::new();
    let mut text_function_condition = None;
    let mut contains_function_condition = None;

    let last_predicates = steps
        .last_mut()
        .map(|step| std::mem::take(&mut step.predicates))
        .unwrap_or_default();

    if last_predicates
        .iter()
        .any(|p| matches!(p, Predicate::Text(_)))
    {
        // `/parent/leaf[text()='v']` selects `parent`.
        let Ok([Predicate::Text(value)]) = <[Predicate; 1]>::try_from(last_predicates) else {
            return Err(parser.error("text() must be the only predicate of its step"));
        };
        if steps.len() < 2 {
            return Err(parser.error("text() needs a parent step"));
        }
        let leaf = steps.pop().map(|step| step.name).unwrap_or_default();
        text_function_condition = Some(TextFunctionCondition {
            leaf_name: leaf,
            value,
        });
    } else {
        for predicate in last_predicates {
            match predicate {
                Predicate::Conditions(conditions, operators) => {
                    if !leaf_conditions.is_empty() {
                        return Err(parser.error("only one condition group is allowed"));
                    }
                    leaf_conditions = conditions;
                    boolean_operators = operators;
                }
                Predicate::Contains(leaf_name, value) => {
                    if contains_function_condition.is_some() {
                        return Err(parser.error("only one contains() is allowed"));
                    }
                    contains_function_condition =
                        Some(ContainsFunctionCondition { leaf_name, value });
                }
                Predicate::Text(_) => {
                    return Err(parser.error("text() must be the only predicate of its step"));
                }
            }
        }
    }

    for step in &steps {
        check_list_keys(&parser, step)?;
    }

    let joined = join_steps(&steps);
    let (xpath_prefix, descendant_name, normalized_parent_path) = match prefix_type {
        PrefixType::Absolute => {
            let parent = match steps.split_last() {
                Some((_, parents)) if !parents.is_empty() => format!("/{}", join_steps(parents)),
                _ => String::new(),
            };
            (format!("/{joined}"), None, parent)
        }
        PrefixType::Descendant => (format!("//{joined}"), Some(joined), String::new()),
    };

    let mut normalized_xpath = xpath_prefix.clone();
    if !leaf_conditions.is_empty() {
        normalized_xpath.push('[');
        normalized_xpath.push_str(&join_conditions(&leaf_conditions, &boolean_operators));
        normalized_xpath.push(']');
    }
    if let Some(contains) = &contains_function_condition {
        normalized_xpath.push_str(&format!(
            "[contains(@{},{})]",
            contains.leaf_name,
            quote(&contains.value)
        ));
    }
    if let Some(text) = &text_function_condition {
        normalized_xpath.push_str(&format!("/{}[text()={}]", text.leaf_name, quote(&text.value)));
    }
    let ancestor_schema_node_identifier = ancestor_steps.map(|steps| join_steps(&steps));
    if let Some(ancestor) = &ancestor_schema_node_identifier {
        normalized_xpath.push_str(&format!("/{ANCESTOR_AXIS}{ancestor}"));
    }

    Ok(PathQuery {
        prefix_type,
        xpath_prefix,
        normalized_xpath,
        normalized_parent_path,
        descendant_name,
        leaf_conditions,
        boolean_operators,
        ancestor_schema_node_identifier,
        text_function_condition,
        contains_function_condition,
    })
}
