//! Set mutations expressed as a verdict plus a value selector.
//!
//! [`SetMutation::decide`] answers "does this change anything" without
//! building a new set; [`SetMutation::select_value`] builds the replacement
//! only once the verdict is `Put`. Both are pure and never fail.

use std::collections::BTreeSet;

use codec::ValueSet;
use store::Verdict;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Abort,
    Remove,
    Put,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetMutation<V: Ord> {
    ReplaceAll(ValueSet<V>),
    AddOne(V),
    AddMany(Vec<V>),
    RemoveOne(V),
    RemoveMany(BTreeSet<V>),
}

impl<V: Ord + Clone> SetMutation<V> {
    pub fn decide(&self, existing: Option<&ValueSet<V>>) -> Decision {
        let existing_len = existing.map_or(0, ValueSet::len);
        match self {
            SetMutation::ReplaceAll(proposed) if proposed.is_empty() => {
                if existing_len == 0 {
                    Decision::Abort
                } else {
                    Decision::Remove
                }
            }
            SetMutation::ReplaceAll(proposed) => {
                if existing == Some(proposed) {
                    Decision::Abort
                } else {
                    Decision::Put
                }
            }
            SetMutation::AddOne(_) => Decision::Put,
            // an empty key is never stored
            SetMutation::AddMany(values) if values.is_empty() && existing_len == 0 => {
                Decision::Abort
            }
            SetMutation::AddMany(_) => Decision::Put,
            SetMutation::RemoveOne(target) => match existing {
                Some(set) if set.contains(target) => {
                    if set.len() == 1 {
                        Decision::Remove
                    } else {
                        Decision::Put
                    }
                }
                _ => Decision::Abort,
            },
            SetMutation::RemoveMany(targets) => {
                let Some(set) = existing else {
                    return Decision::Abort;
                };
                let hits = targets.iter().filter(|t| set.contains(t)).count();
                if hits == 0 {
                    Decision::Abort
                } else if hits == set.len() {
                    Decision::Remove
                } else {
                    Decision::Put
                }
            }
        }
    }

    /// The replacement set for a `Put` verdict.
    pub fn select_value(&self, existing: Option<&ValueSet<V>>) -> ValueSet<V> {
        let base = || existing.cloned().unwrap_or_default();
        match self {
            SetMutation::ReplaceAll(proposed) => proposed.clone(),
            SetMutation::AddOne(value) => base().with(value.clone()),
            SetMutation::AddMany(values) => base().with_all(values.iter().cloned()),
            SetMutation::RemoveOne(target) => base().without(target),
            SetMutation::RemoveMany(targets) => base().without_all(targets),
        }
    }

    /// Runs both steps; the shape [`store::MVMap::operate`] expects.
    pub fn into_verdict(self, existing: Option<&ValueSet<V>>) -> Verdict<ValueSet<V>> {
        match self.decide(existing) {
            Decision::Abort => Verdict::Abort,
            Decision::Remove => Verdict::Remove,
            Decision::Put => Verdict::Put(self.select_value(existing)),
        }
    }
}
