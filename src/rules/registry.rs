use super::async_rules::{BlockingAsyncCallRule, PreferAddOverAddAsyncRule, SyncOverAsyncRule};
use super::database_rules::{NPlusOneQueryRule, SaveChangesInLoopRule};
use super::lifetime_rules::DbContextSingletonLifetimeRule;
use super::materialization_rules::{
    ClientSideEvaluationRule, CountForExistenceRule, MaterializeToCountRule,
    RedundantMaterializationRule,
};
use super::ordering_rules::{LastWithoutOrderByRule, UnorderedPaginationRule};
use super::sql_rules::RawSqlInjectionRule;
use super::tracking_rules::{CartesianExplosionRule, MissingAsNoTrackingRule};
use super::translation_rules::{NonSargablePredicateRule, UntranslatableMethodInQueryRule};
use super::Rule;

/// Rules kept by `--strict`: patterns that are bugs whenever they match.
pub const STRICT_RULES: &[&str] = &[
    "last-without-order-by",
    "raw-sql-injection",
    "blocking-async-call",
    "dbcontext-singleton-lifetime",
];

/// Get all registered rules
pub fn all_rules() -> Vec<Box<dyn Rule>> {
    vec![
        // Materialization
        Box::new(ClientSideEvaluationRule),
        Box::new(RedundantMaterializationRule),
        Box::new(MaterializeToCountRule),
        Box::new(CountForExistenceRule),
        // Round trips
        Box::new(NPlusOneQueryRule),
        Box::new(SaveChangesInLoopRule),
        // Async
        Box::new(SyncOverAsyncRule),
        Box::new(BlockingAsyncCallRule),
        Box::new(PreferAddOverAddAsyncRule),
        // Tracking and loading
        Box::new(MissingAsNoTrackingRule),
        Box::new(CartesianExplosionRule),
        // Ordering
        Box::new(UnorderedPaginationRule),
        Box::new(LastWithoutOrderByRule),
        // Raw SQL
        Box::new(RawSqlInjectionRule),
        // Translation
        Box::new(NonSargablePredicateRule),
        Box::new(UntranslatableMethodInQueryRule),
        // Lifetime
        Box::new(DbContextSingletonLifetimeRule),
    ]
}

/// Get a rule by its ID
pub fn get_rule(id: &str) -> Option<Box<dyn Rule>> {
    all_rules().into_iter().find(|r| r.id() == id)
}

/// Whether `id` names a registered rule.
pub fn has_rule(id: &str) -> bool {
    all_rules().iter().any(|r| r.id() == id)
}
