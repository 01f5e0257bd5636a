use std::collections::HashMap;

use thiserror::Error;

use crate::atoms::{read_word, Atom, AtomScanner, Term};
use crate::{ACTION_PREFIX, TYPE_PREFIX};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ClassifyError {
    /// The head could be recognized but not decoded into a schema signature.
    #[error("schema head `{0}` carries a non-variable argument")]
    MalformedHead(String),
    /// A variable ranges over more than one type.
    #[error("schema `{schema}`: variable {variable} is bound by more than one type atom")]
    AmbiguousVariable { schema: String, variable: String },
    /// A head variable ranges over no type at all.
    #[error("schema `{schema}`: head variable {variable} is not bound by any type atom")]
    UnboundVariable { schema: String, variable: String },
}

pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Maps each head variable to its 0-based position in the head's argument
/// list.
#[derive(Debug, Clone, Default)]
pub struct VariableIndex {
    positions: HashMap<String, usize>,
}

impl VariableIndex {
    fn from_head(head: &Atom) -> Self {
        let mut positions = HashMap::new();
        for (pos, term) in head.terms.iter().enumerate() {
            positions.insert(term.name().to_owned(), pos);
        }
        Self { positions }
    }

    pub fn position(&self, variable: &str) -> Option<usize> {
        self.positions.get(variable).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.positions.keys().map(String::as_str)
    }
}

/// A body atom asserting that `variable` ranges over a type's element set.
/// `candidates` are the body atoms that textually mention the variable,
/// attached by a coarse substring scan over the raw body.
#[derive(Debug, Clone)]
pub struct DomainAtom {
    pub text: String,
    pub variable: String,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RelationAtom {
    pub text: String,
    pub atom: Atom,
}

#[derive(Debug, Clone)]
pub struct InequalityAtom {
    pub text: String,
    pub lhs: Term,
    pub rhs: Term,
}

#[derive(Debug, Clone)]
pub enum BodyAtom {
    Domain(DomainAtom),
    Relation(RelationAtom),
    Inequality(InequalityAtom),
}

/// One schema rule, classified. Body atoms keep their appearance order,
/// which drives the fresh-name numbering.
#[derive(Debug, Clone)]
pub struct ClassifiedRule {
    pub name: String,
    pub head: Atom,
    pub vars: VariableIndex,
    pub body: Vec<BodyAtom>,
}

/// Classifies one theory line; `Ok(None)` for lines that do not start with
/// an action-schema head.
pub fn classify(line: &str) -> Result<Option<ClassifiedRule>> {
    let (head, head_end) = match schema_head(line) {
        Some(h) => h,
        None => {
            // a line that opens like a schema but decodes into nothing is
            // malformed, everything else is upstream grounding material
            return match read_word(line, 0) {
                Some((name, _)) if name.starts_with(ACTION_PREFIX) => {
                    Err(ClassifyError::MalformedHead(name.to_owned()))
                }
                _ => Ok(None),
            };
        }
    };

    if head.terms.iter().any(|t| !t.is_variable()) {
        return Err(ClassifyError::MalformedHead(head.to_string()));
    }
    let vars = VariableIndex::from_head(&head);

    // Coarse textual scan of the raw body for candidate-condition atoms,
    // separate from the structural pass below.
    let conditions = body_conditions(line);

    let mut body = vec![];
    for m in AtomScanner::starting_at(line, "", head_end) {
        if m.atom.is_inequality() {
            body.push(BodyAtom::Inequality(InequalityAtom {
                text: m.text,
                lhs: m.atom.terms[0].clone(),
                rhs: m.atom.terms[1].clone(),
            }));
        } else if m.atom.predicate.starts_with(TYPE_PREFIX)
            && m.atom.terms.first().is_some_and(Term::is_variable)
        {
            let variable = m.atom.terms[0].name().to_owned();
            let candidates = conditions
                .iter()
                .filter(|c| c.contains(&variable))
                .cloned()
                .collect();
            body.push(BodyAtom::Domain(DomainAtom {
                text: m.text,
                variable,
                candidates,
            }));
        } else {
            body.push(BodyAtom::Relation(RelationAtom {
                text: m.text,
                atom: m.atom,
            }));
        }
    }

    let rule = ClassifiedRule {
        name: head.predicate.clone(),
        head,
        vars,
        body,
    };
    validate(&rule)?;
    Ok(Some(rule))
}

fn schema_head(line: &str) -> Option<(Atom, usize)> {
    if let Some(m) = AtomScanner::new(line, ACTION_PREFIX).next() {
        if m.start == 0 && !m.atom.is_inequality() {
            return Some((m.atom, m.end));
        }
    }
    // fact-like nullary heads are written without parentheses
    let (name, end) = read_word(line, 0)?;
    if !name.starts_with(ACTION_PREFIX) {
        return None;
    }
    let rest = line[end..].trim_start();
    (rest.is_empty() || rest.starts_with(":-") || rest.starts_with('.')).then(|| {
        (
            Atom {
                predicate: name.to_owned(),
                terms: vec![],
            },
            end,
        )
    })
}

fn body_conditions(line: &str) -> Vec<String> {
    let body = match line.split_once(":-") {
        Some((_, body)) => body,
        None => return vec![],
    };
    let body = body.trim_end().trim_end_matches('.');
    AtomScanner::new(body, "")
        .filter(|m| !m.atom.is_inequality() && m.atom.arity() > 0)
        .map(|m| m.text)
        .collect()
}

// every variable ranges over at most one type, head variables over
// exactly one
fn validate(rule: &ClassifiedRule) -> Result<()> {
    let mut bindings: HashMap<&str, usize> = HashMap::new();
    for item in &rule.body {
        if let BodyAtom::Domain(domain) = item {
            let seen = bindings.entry(domain.variable.as_str()).or_insert(0);
            *seen += 1;
            if *seen > 1 {
                return Err(ClassifyError::AmbiguousVariable {
                    schema: rule.name.clone(),
                    variable: domain.variable.clone(),
                });
            }
        }
    }
    for variable in rule.vars.variables() {
        if !bindings.contains_key(variable) {
            return Err(ClassifyError::UnboundVariable {
                schema: rule.name.clone(),
                variable: variable.to_owned(),
            });
        }
    }
    Ok(())
}
