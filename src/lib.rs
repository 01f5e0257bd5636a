#![deny(clippy::all)]

pub mod atoms;
pub mod counting;
pub mod encoder;
pub mod pipeline;
pub mod schema;
pub mod solver;
pub mod utils;

/// Head predicates carrying this prefix are action schemas.
pub const ACTION_PREFIX: &str = "action_";
/// Body predicates carrying this prefix range a variable over a type.
pub const TYPE_PREFIX: &str = "pddl_type";
/// Prefix of the per-variable domain guess predicates.
pub const DOMAIN_GUESS_PREFIX: &str = "g_";
/// Prefix of the per-occurrence relation guess predicates.
pub const RELATION_GUESS_PREFIX: &str = "p_";
/// Prefix of the complementary check predicates of a guess/check pair.
pub const CHECK_PREFIX: &str = "n_";
/// Exit code signalling that the reported total is only a lower bound.
pub const BOUNDED_EXIT: i32 = 10;
