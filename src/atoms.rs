use std::fmt;

use itertools::Itertools;

pub const NEQ: &str = "!=";

/// Gringo convention: a leading uppercase letter or underscore marks a
/// variable, everything else is a constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Variable(String),
    Constant(String),
}

impl Term {
    pub fn parse(token: &str) -> Self {
        match token.chars().next() {
            Some(c) if c.is_ascii_uppercase() || c == '_' => Term::Variable(token.to_owned()),
            _ => Term::Constant(token.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Term::Variable(s) | Term::Constant(s) => s,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Term::Variable(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A predicate occurrence `name(t1,...,tn)`, or an inequality `t1 != t2`
/// under the reserved predicate [`NEQ`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub predicate: String,
    pub terms: Vec<Term>,
}

impl Atom {
    pub fn arity(&self) -> usize {
        self.terms.len()
    }

    pub fn is_inequality(&self) -> bool {
        self.predicate == NEQ
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_inequality() {
            write!(f, "{} {} {}", self.terms[0], NEQ, self.terms[1])
        } else if self.terms.is_empty() {
            f.write_str(&self.predicate)
        } else {
            write!(f, "{}({})", self.predicate, self.terms.iter().join(","))
        }
    }
}

/// One recognized atom occurrence; `text` is the verbatim matched
/// substring, copied through into generated constraints unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomMatch {
    pub text: String,
    pub atom: Atom,
    pub start: usize,
    pub end: usize,
}

/// Scans a line for atom occurrences whose predicate starts with a given
/// prefix (the empty prefix matches everything); unparseable text is
/// skipped silently.
pub struct AtomScanner<'a> {
    text: &'a str,
    prefix: &'a str,
    pos: usize,
}

impl<'a> AtomScanner<'a> {
    pub fn new(text: &'a str, prefix: &'a str) -> Self {
        Self::starting_at(text, prefix, 0)
    }

    pub fn starting_at(text: &'a str, prefix: &'a str, pos: usize) -> Self {
        Self { text, prefix, pos }
    }

    fn match_at(&mut self, start: usize, name_end: usize) -> Option<AtomMatch> {
        let bytes = self.text.as_bytes();
        let name = &self.text[start..name_end];
        let mut cur = skip_whitespace(self.text, name_end);

        if self.text[cur..].starts_with(NEQ) {
            cur = skip_whitespace(self.text, cur + NEQ.len());
            let (rhs, end) = read_word(self.text, cur)?;
            let atom = Atom {
                predicate: NEQ.to_owned(),
                terms: vec![Term::parse(name), Term::parse(rhs)],
            };
            self.pos = end;
            return Some(AtomMatch {
                text: self.text[start..end].to_owned(),
                atom,
                start,
                end,
            });
        }

        if bytes.get(cur) != Some(&b'(') {
            return None;
        }
        cur += 1;

        let mut terms = vec![];
        loop {
            cur = skip_whitespace(self.text, cur);
            if terms.is_empty() && bytes.get(cur) == Some(&b')') {
                cur += 1;
                break;
            }
            let (token, end) = read_word(self.text, cur)?;
            terms.push(Term::parse(token));
            cur = skip_whitespace(self.text, end);
            match bytes.get(cur) {
                Some(b',') => cur += 1,
                Some(b')') => {
                    cur += 1;
                    break;
                }
                _ => return None,
            }
        }

        let atom = Atom {
            predicate: name.to_owned(),
            terms,
        };
        self.pos = cur;
        Some(AtomMatch {
            text: self.text[start..cur].to_owned(),
            atom,
            start,
            end: cur,
        })
    }
}

impl Iterator for AtomScanner<'_> {
    type Item = AtomMatch;

    fn next(&mut self) -> Option<AtomMatch> {
        let bytes = self.text.as_bytes();
        while self.pos < bytes.len() {
            if !is_name_start(bytes[self.pos]) {
                self.pos += 1;
                continue;
            }
            let start = self.pos;
            let mut name_end = start;
            while name_end < bytes.len() && is_word_byte(bytes[name_end]) {
                name_end += 1;
            }
            self.pos = name_end;
            if !self.text[start..name_end].starts_with(self.prefix) {
                continue;
            }
            if let Some(matched) = self.match_at(start, name_end) {
                return Some(matched);
            }
        }
        None
    }
}

fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn skip_whitespace(text: &str, mut pos: usize) -> usize {
    let bytes = text.as_bytes();
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

pub(crate) fn read_word(text: &str, pos: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    let mut end = pos;
    while end < bytes.len() && is_word_byte(bytes[end]) {
        end += 1;
    }
    (end > pos).then_some((&text[pos..end], end))
}
