use proptest::prelude::*;

/// A single context mutation an action may perform.
#[derive(Debug, Clone)]
pub enum Mutation {
    Set(String, i64),
    Remove(String),
    Noop,
}

pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alpha", "beta", "gamma", "delta"]).prop_map(String::from)
}

pub fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    prop_oneof![
        (key_strategy(), 0i64..5).prop_map(|(key, value)| Mutation::Set(key, value)),
        key_strategy().prop_map(Mutation::Remove),
        Just(Mutation::Noop),
    ]
}

/// Issue values, some of which no handler claims.
pub fn issue_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["Basic", "Intermediate", "Advanced", ""]).prop_map(String::from)
}
