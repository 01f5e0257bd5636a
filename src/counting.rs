use std::fmt;

use rayon::prelude::*;
use rug::Integer;

use crate::encoder::{CountingFragment, Encoder};
use crate::schema;
use crate::solver::{CancelToken, Result, Solver, SolverResult};

/// Running total over all schemas; `bounded` latches once any schema
/// reports a bound or stays unresolved.
#[derive(Debug, Clone, Default)]
pub struct Aggregate {
    pub total: Integer,
    pub bounded: bool,
}

impl Aggregate {
    pub fn add(&mut self, result: &SolverResult) {
        match &result.count {
            Some(count) => {
                self.total += count;
                if result.is_bound {
                    self.bounded = true;
                }
            }
            // unresolved schema: no confidence left in the total
            None => self.bounded = true,
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.total, if self.bounded { "+" } else { "" })
    }
}

/// Scans the theory for schema rules, encodes each into a counting
/// fragment, runs the counter per fragment, and folds the results.
pub struct ActionsCounter {
    facts: String,
    theory: String,
    encoder: Encoder,
    solver: Solver,
}

impl ActionsCounter {
    pub fn new(facts: String, theory: String, encoder: Encoder, solver: Solver) -> Self {
        Self {
            facts,
            theory,
            encoder,
            solver,
        }
    }

    /// One entry per schema rule, in theory order. `None` marks a schema
    /// with no safe encoding; it stays in the list so the aggregate
    /// remembers it as unresolved.
    pub fn fragments(&self) -> Vec<Option<CountingFragment>> {
        let mut fragments = vec![];
        for line in self.theory.lines() {
            match schema::classify(line) {
                Ok(Some(rule)) => fragments.push(Some(self.encoder.encode(&rule))),
                Ok(None) => {}
                Err(schema::ClassifyError::MalformedHead(head)) => {
                    tracing::warn!("skipping schema with undecodable head `{head}`");
                }
                Err(err) => {
                    tracing::error!("{err}; treating its count as unresolved");
                    fragments.push(None);
                }
            }
        }
        fragments
    }

    /// Counts every schema and aggregates. With `jobs > 1` the counters
    /// run on the rayon pool; results are resequenced to theory order
    /// before aggregation.
    pub fn count_actions(&self, jobs: usize, cancel: &CancelToken) -> Result<Aggregate> {
        let fragments = self.fragments();
        let mut aggregate = Aggregate::default();

        if jobs > 1 {
            let results: Vec<_> = fragments
                .par_iter()
                .map(|fragment| self.solve(fragment, cancel))
                .collect();
            for result in results {
                self.fold(&mut aggregate, result?);
            }
        } else {
            for fragment in &fragments {
                let result = self.solve(fragment, cancel)?;
                self.fold(&mut aggregate, result);
            }
        }
        Ok(aggregate)
    }

    fn solve(
        &self,
        fragment: &Option<CountingFragment>,
        cancel: &CancelToken,
    ) -> Result<SolverResult> {
        match fragment {
            Some(fragment) => {
                tracing::info!(
                    "counting {} on {} facts and {} rules",
                    fragment.label,
                    self.facts.lines().count(),
                    fragment.lines
                );
                self.solver.count(&self.facts, fragment, cancel)
            }
            None => Ok(SolverResult::default()),
        }
    }

    fn fold(&self, aggregate: &mut Aggregate, result: SolverResult) {
        aggregate.add(&result);
        tracing::info!("# of actions (intermediate result): {aggregate}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncodingMode;

    fn resolved(count: i32) -> SolverResult {
        SolverResult {
            count: Some(Integer::from(count)),
            ..SolverResult::default()
        }
    }

    #[test]
    fn unresolved_schema_forces_bound_but_later_counts_still_add() {
        let mut aggregate = Aggregate::default();
        aggregate.add(&resolved(4));
        aggregate.add(&SolverResult::default());
        aggregate.add(&resolved(3));
        assert_eq!(aggregate.total, Integer::from(7));
        assert!(aggregate.bounded);
        assert_eq!(aggregate.to_string(), "7+");
    }

    #[test]
    fn bound_flag_latches() {
        let mut aggregate = Aggregate::default();
        aggregate.add(&SolverResult {
            count: Some(Integer::from(12)),
            is_bound: true,
            tuples: vec![],
        });
        aggregate.add(&resolved(1));
        assert!(aggregate.bounded);
        assert_eq!(aggregate.to_string(), "13+");
    }

    #[test]
    fn exact_aggregate_has_no_marker() {
        let mut aggregate = Aggregate::default();
        aggregate.add(&resolved(42));
        assert_eq!(aggregate.to_string(), "42");
    }

    // the script path must outlive the counter, hence the pair
    #[cfg(unix)]
    fn counter_over(theory: &str, script: &str) -> (ActionsCounter, tempfile::TempPath) {
        let script = fake_counter(script);
        let counter = ActionsCounter::new(
            "pddl_type_loc(cell1).\n".to_owned(),
            theory.to_owned(),
            Encoder::new(EncodingMode::Extensional, false),
            Solver::new(&*script, Some(0), false, true),
        );
        (counter, script)
    }

    #[cfg(unix)]
    fn fake_counter(body: &str) -> tempfile::TempPath {
        use std::io::Write as _;
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "cat > /dev/null").unwrap();
        writeln!(file, "{body}").unwrap();
        let path = file.into_temp_path();
        let mut permissions = std::fs::metadata(&path).unwrap().permissions();
        permissions.set_mode(0o755);
        std::fs::set_permissions(&path, permissions).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn counts_each_schema_line() {
        let theory = "pddl_type_loc(cell1).\n\
                      action_a(X) :- pddl_type_loc(X).\n\
                      action_b(X) :- pddl_type_loc(X).\n";
        let (counter, _script) = counter_over(theory, "echo 's 3'");
        let aggregate = counter.count_actions(1, &CancelToken::new()).unwrap();
        assert_eq!(aggregate.total, Integer::from(6));
        assert!(!aggregate.bounded);
    }

    #[cfg(unix)]
    #[test]
    fn unsafe_schema_taints_the_total() {
        let theory = "action_a(X) :- pddl_type_loc(X).\n\
                      action_b(X,Y) :- pddl_type_loc(X), on(X,Y).\n";
        let (counter, _script) = counter_over(theory, "echo 's 3'");
        let aggregate = counter.count_actions(1, &CancelToken::new()).unwrap();
        assert_eq!(aggregate.total, Integer::from(3));
        assert!(aggregate.bounded);
    }

    #[cfg(unix)]
    #[test]
    fn parallel_run_matches_sequential() {
        let theory = "action_a(X) :- pddl_type_loc(X).\n\
                      action_b(X) :- pddl_type_loc(X).\n\
                      action_c(X) :- pddl_type_loc(X).\n";
        let script = fake_counter("echo 's 2'");
        let make = || {
            ActionsCounter::new(
                String::new(),
                theory.to_owned(),
                Encoder::new(EncodingMode::Extensional, false),
                Solver::new(&*script, Some(0), false, true),
            )
        };
        let sequential = make().count_actions(1, &CancelToken::new()).unwrap();
        let parallel = make().count_actions(2, &CancelToken::new()).unwrap();
        assert_eq!(sequential.total, parallel.total);
        assert_eq!(sequential.total, Integer::from(6));
    }
}
