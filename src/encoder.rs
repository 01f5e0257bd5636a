use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use itertools::Itertools;

use crate::atoms::Atom;
use crate::schema::{BodyAtom, ClassifiedRule, RelationAtom, VariableIndex};
use crate::{CHECK_PREFIX, DOMAIN_GUESS_PREFIX, RELATION_GUESS_PREFIX};

/// Strategy used to turn a schema rule into a counting program.
/// `Extensional` enforces relations as hard constraints and is the
/// tightest; the other two re-guess relational occurrences and may
/// overcount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodingMode {
    #[default]
    Extensional,
    ChoiceGuess,
    GuessCheckParity,
}

/// Generated counting program for one schema; `vars` and `slots` let the
/// solver driver decode reported ground values back into head positions.
#[derive(Debug, Clone)]
pub struct CountingFragment {
    pub program: String,
    pub lines: usize,
    pub label: String,
    pub vars: VariableIndex,
    pub slots: HashMap<(String, usize), usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    mode: EncodingMode,
    output: bool,
}

impl Encoder {
    pub fn new(mode: EncodingMode, output: bool) -> Self {
        Self { mode, output }
    }

    pub fn mode(&self) -> EncodingMode {
        self.mode
    }

    /// Emits the counting fragment for one classified rule. The fresh-name
    /// counter is local to the call, so encoding is deterministic.
    pub fn encode(&self, rule: &ClassifiedRule) -> CountingFragment {
        let mut prog = String::new();
        let mut slots = HashMap::new();
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut counter = 0usize;
        let mut relations: Vec<(usize, RelationAtom)> = vec![];

        for item in &rule.body {
            match item {
                BodyAtom::Domain(domain) => {
                    let v = &domain.variable;
                    let _ = writeln!(
                        prog,
                        "1 {{ {DOMAIN_GUESS_PREFIX}{v}({v}) : {} }} 1.",
                        domain.candidates.iter().join(",")
                    );
                    let _ = writeln!(prog, "#show {DOMAIN_GUESS_PREFIX}{v}/1.");
                }
                BodyAtom::Inequality(inequality) => {
                    // checked against the chosen values, never counted
                    let _ = write!(prog, ":- {}", inequality.text.replace('!', ""));
                    for term in [&inequality.lhs, &inequality.rhs] {
                        if term.is_variable() {
                            let _ = write!(
                                prog,
                                ", {DOMAIN_GUESS_PREFIX}{t}({t})",
                                t = term.name()
                            );
                        }
                    }
                    let _ = writeln!(prog, ".");
                }
                BodyAtom::Relation(relation) => {
                    counter += 1;
                    self.encode_relation(&mut prog, relation, counter, &relations);
                    self.record_slots(&mut slots, &mut claimed, rule, relation, counter);
                    relations.push((counter, relation.clone()));
                }
            }
        }

        let lines = prog.lines().count();
        CountingFragment {
            program: prog,
            lines,
            label: rule.name.clone(),
            vars: rule.vars.clone(),
            slots,
        }
    }

    fn encode_relation(
        &self,
        prog: &mut String,
        relation: &RelationAtom,
        counter: usize,
        earlier: &[(usize, RelationAtom)],
    ) {
        let text = &relation.text;
        match self.mode {
            EncodingMode::Extensional => {
                let _ = write!(prog, ":- not {text}");
                for term in &relation.atom.terms {
                    if term.is_variable() {
                        let _ =
                            write!(prog, ", {DOMAIN_GUESS_PREFIX}{t}({t})", t = term.name());
                    }
                }
                let _ = writeln!(prog, ".");
            }
            EncodingMode::ChoiceGuess => {
                let _ = writeln!(
                    prog,
                    "1 {{ {RELATION_GUESS_PREFIX}{counter}{text} : {text} }} 1."
                );
            }
            EncodingMode::GuessCheckParity => {
                let _ = writeln!(
                    prog,
                    "{p}{counter}{text} :- not {n}{counter}{text}, {text}. \
                     {n}{counter}{text} :- not {p}{counter}{text}, {text}.",
                    p = RELATION_GUESS_PREFIX,
                    n = CHECK_PREFIX,
                );
                // order textually identical occurrences so their bindings
                // are not counted once per permutation
                if let Some(first) = relation.atom.terms.first() {
                    let copy = copy_atom(&relation.atom);
                    for (other, _) in earlier.iter().filter(|(_, o)| o.text == *text) {
                        let _ = writeln!(
                            prog,
                            ":- {p}{other}{text}, {p}{counter}{copy}, {a} > {a}_c.",
                            p = RELATION_GUESS_PREFIX,
                            a = first.name(),
                        );
                    }
                }
            }
        }
        if self.output && self.mode != EncodingMode::Extensional {
            let _ = writeln!(
                prog,
                "#show {RELATION_GUESS_PREFIX}{counter}{}/{}.",
                relation.atom.predicate,
                relation.atom.arity()
            );
        }
    }

    // first occurrence covering a head position wins its slot
    fn record_slots(
        &self,
        slots: &mut HashMap<(String, usize), usize>,
        claimed: &mut HashSet<usize>,
        rule: &ClassifiedRule,
        relation: &RelationAtom,
        counter: usize,
    ) {
        let name = format!(
            "{RELATION_GUESS_PREFIX}{counter}{}",
            relation.atom.predicate
        );
        for (slot, term) in relation.atom.terms.iter().enumerate() {
            if !term.is_variable() {
                continue;
            }
            if let Some(position) = rule.vars.position(term.name()) {
                if claimed.insert(position) {
                    slots.insert((name.clone(), slot), position);
                }
            }
        }
    }
}

fn copy_atom(atom: &Atom) -> String {
    format!(
        "{}({})",
        atom.predicate,
        atom.terms.iter().map(|t| format!("{t}_c")).join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::{AtomScanner, Term};
    use crate::schema::classify;

    const MOVE: &str =
        "action_move(X,Y) :- pddl_type_loc(X), pddl_type_loc(Y), connected(X,Y), X != Y.";

    fn rule(line: &str) -> ClassifiedRule {
        classify(line).unwrap().unwrap()
    }

    fn ground(atom: &Atom, variable: &str, value: &str) -> Atom {
        Atom {
            predicate: atom.predicate.clone(),
            terms: atom
                .terms
                .iter()
                .map(|t| match t {
                    Term::Variable(v) if v == variable => Term::Constant(value.to_owned()),
                    other => other.clone(),
                })
                .collect(),
        }
    }

    fn unifies(condition: &Atom, fact: &Atom) -> bool {
        if condition.predicate != fact.predicate || condition.arity() != fact.arity() {
            return false;
        }
        let mut binding: HashMap<&str, &str> = HashMap::new();
        condition.terms.iter().zip(&fact.terms).all(|(c, f)| match c {
            Term::Variable(v) => binding
                .insert(v, f.name())
                .is_none_or(|prev| prev == f.name()),
            Term::Constant(c) => c == f.name(),
        })
    }

    // Brute-force answer-set count of a one-variable fragment over a fact
    // set, covering the rule shapes the encoder emits for such fragments:
    // the domain choice, tagged relation choices, and `:- not` constraints.
    fn count_models(fragment: &CountingFragment, facts: &[&str]) -> usize {
        let fact_atoms: Vec<Atom> = facts
            .iter()
            .flat_map(|f| AtomScanner::new(f, ""))
            .map(|m| m.atom)
            .collect();
        let fact_set: HashSet<String> = fact_atoms.iter().map(Atom::to_string).collect();
        let constants: Vec<String> = fact_atoms
            .iter()
            .flat_map(|a| &a.terms)
            .map(|t| t.name().to_owned())
            .unique()
            .collect();

        let mut variable = String::new();
        let mut candidates: Vec<Atom> = vec![];
        let mut negated: Vec<Atom> = vec![];
        let mut multiplier = 1usize;

        for line in fragment.program.lines() {
            if let Some(rest) = line.strip_prefix("1 { g_") {
                variable = rest[..rest.find('(').unwrap()].to_owned();
                let inner = &rest[rest.find(" : ").unwrap() + 3..rest.find(" } 1.").unwrap()];
                candidates = AtomScanner::new(inner, "").map(|m| m.atom).collect();
            } else if line.starts_with("1 {") {
                // the choice-local variable ranges over every fact, no
                // matter which domain value was picked
                let inner = &line[line.find(" : ").unwrap() + 3..line.find(" } 1.").unwrap()];
                let condition = AtomScanner::new(inner, "").next().unwrap().atom;
                multiplier *= fact_atoms.iter().filter(|f| unifies(&condition, f)).count();
            } else if let Some(rest) = line.strip_prefix(":- not ") {
                negated.push(AtomScanner::new(rest, "").next().unwrap().atom);
            }
        }

        let mut models = 0;
        for value in &constants {
            let supported = candidates
                .iter()
                .all(|c| fact_set.contains(&ground(c, &variable, value).to_string()));
            let violated = negated
                .iter()
                .any(|n| !fact_set.contains(&ground(n, &variable, value).to_string()));
            if supported && !violated {
                models += multiplier;
            }
        }
        models
    }

    const PICK: &str = "action_pick(X) :- pddl_type_obj(X), clear(X).";
    const PICK_FACTS: &[&str] = &[
        "pddl_type_obj(a).",
        "pddl_type_obj(b).",
        "pddl_type_obj(c).",
        "clear(a).",
        "clear(b).",
    ];

    #[test]
    fn extensional_count_matches_ground_instantiations() {
        // three objects, two of which satisfy the precondition: the
        // fragment must count exactly the two groundings the rule has
        let fragment = Encoder::new(EncodingMode::Extensional, false).encode(&rule(PICK));
        assert_eq!(count_models(&fragment, PICK_FACTS), 2);
    }

    #[test]
    fn choice_guess_never_undercounts_extensional() {
        let exact = count_models(
            &Encoder::new(EncodingMode::Extensional, false).encode(&rule(PICK)),
            PICK_FACTS,
        );
        let guessed = count_models(
            &Encoder::new(EncodingMode::ChoiceGuess, false).encode(&rule(PICK)),
            PICK_FACTS,
        );
        assert!(guessed >= exact);
        assert_eq!(exact, 2);
        assert_eq!(guessed, 4);
    }

    #[test]
    fn extensional_fragment_for_move() {
        let fragment = Encoder::new(EncodingMode::Extensional, false).encode(&rule(MOVE));
        assert_eq!(
            fragment.program,
            "1 { g_X(X) : pddl_type_loc(X),connected(X,Y) } 1.\n\
             #show g_X/1.\n\
             1 { g_Y(Y) : pddl_type_loc(Y),connected(X,Y) } 1.\n\
             #show g_Y/1.\n\
             :- not connected(X,Y), g_X(X), g_Y(Y).\n\
             :- X = Y, g_X(X), g_Y(Y).\n"
        );
        assert_eq!(fragment.lines, 6);
        assert_eq!(fragment.label, "action_move");
    }

    #[test]
    fn one_domain_guess_per_head_variable() {
        let fragment = Encoder::new(EncodingMode::Extensional, false).encode(&rule(MOVE));
        let guesses = fragment
            .program
            .lines()
            .filter(|l| l.starts_with("1 { g_"))
            .count();
        assert_eq!(guesses, fragment.vars.len());
    }

    #[test]
    fn encoding_is_idempotent() {
        let rule = rule(MOVE);
        let encoder = Encoder::new(EncodingMode::GuessCheckParity, true);
        assert_eq!(encoder.encode(&rule).program, encoder.encode(&rule).program);
    }

    #[test]
    fn inequality_introduces_no_guess_predicate() {
        let fragment = Encoder::new(EncodingMode::ChoiceGuess, false)
            .encode(&rule("action_swap(X,Y) :- pddl_type_t(X), pddl_type_t(Y), X != Y."));
        assert!(!fragment.program.contains(RELATION_GUESS_PREFIX));
        assert!(fragment.program.contains(":- X = Y, g_X(X), g_Y(Y)."));
    }

    #[test]
    fn choice_guess_tags_each_occurrence() {
        let fragment = Encoder::new(EncodingMode::ChoiceGuess, false).encode(&rule(
            "action_a(X) :- pddl_type_t(X), on(X,X), on(X,X).",
        ));
        assert!(fragment
            .program
            .contains("1 { p_1on(X,X) : on(X,X) } 1."));
        assert!(fragment
            .program
            .contains("1 { p_2on(X,X) : on(X,X) } 1."));
    }

    #[test]
    fn parity_pair_and_single_symmetry_constraint() {
        let fragment = Encoder::new(EncodingMode::GuessCheckParity, false).encode(&rule(
            "action_a(X) :- pddl_type_t(X), on(X,X), on(X,X).",
        ));
        assert!(fragment
            .program
            .contains("p_1on(X,X) :- not n_1on(X,X), on(X,X). n_1on(X,X) :- not p_1on(X,X), on(X,X)."));
        let symmetry: Vec<_> = fragment
            .program
            .lines()
            .filter(|l| l.contains('>'))
            .collect();
        assert_eq!(
            symmetry,
            vec![":- p_1on(X,X), p_2on(X_c,X_c), X > X_c."]
        );
    }

    #[test]
    fn relation_guesses_shown_only_without_extensional_output() {
        let ext = Encoder::new(EncodingMode::Extensional, true).encode(&rule(MOVE));
        assert!(!ext.program.contains("#show p_"));
        let choices = Encoder::new(EncodingMode::ChoiceGuess, true).encode(&rule(MOVE));
        assert!(choices.program.contains("#show p_1connected/2."));
        let silent = Encoder::new(EncodingMode::ChoiceGuess, false).encode(&rule(MOVE));
        assert!(!silent.program.contains("#show p_"));
    }

    #[test]
    fn slot_map_covers_head_positions_once() {
        let fragment = Encoder::new(EncodingMode::ChoiceGuess, true).encode(&rule(MOVE));
        assert_eq!(fragment.slots.len(), 2);
        assert_eq!(fragment.slots[&("p_1connected".to_owned(), 0)], 0);
        assert_eq!(fragment.slots[&("p_1connected".to_owned(), 1)], 1);
    }

    #[test]
    fn empty_body_yields_empty_program() {
        let fragment =
            Encoder::new(EncodingMode::Extensional, false).encode(&rule("action_stop."));
        assert!(fragment.program.is_empty());
        assert_eq!(fragment.lines, 0);
        assert_eq!(fragment.label, "action_stop");
    }
}
