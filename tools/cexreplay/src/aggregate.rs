use crate::trace::{TraceItem, TraceRecord, TraceWarning};
use std::cmp::Ordering;
use std::collections::BTreeMap;

const INTERNAL_NONDET_ALIAS: &str = "SMACK_nondet";
const EXTERNAL_NONDET_ALIAS: &str = "VERIFIER_nondet";

/// Argument position as written in the trace. Orders numerically when both
/// sides are integers so that `10` follows `9`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgIndex(pub String);

impl Ord for ArgIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ArgIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedTrace {
    /// Every recorded return value per function, in call order.
    pub return_values: BTreeMap<String, Vec<String>>,
    /// First value seen per function and argument index.
    pub arguments: BTreeMap<String, BTreeMap<ArgIndex, String>>,
    pub warnings: Vec<TraceWarning>,
}

impl AggregatedTrace {
    pub fn is_empty(&self) -> bool {
        self.return_values.is_empty() && self.arguments.is_empty()
    }

    pub fn record(&mut self, record: TraceRecord) {
        match record {
            TraceRecord::Return { function, value } => {
                self.return_values
                    .entry(normalize_function_name(&function))
                    .or_default()
                    .push(value);
            }
            TraceRecord::Argument {
                function,
                index,
                value,
            } => {
                self.arguments
                    .entry(normalize_function_name(&function))
                    .or_default()
                    .entry(ArgIndex(index))
                    .or_insert(value);
            }
        }
    }

    /// Captured arguments of `function` in index order.
    pub fn arguments_for(&self, function: &str) -> Vec<&str> {
        self.arguments
            .get(function)
            .map(|args| args.values().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Maps the verifier's internal nondeterministic alias onto the externally
/// visible `__VERIFIER_nondet_*` convention.
pub fn normalize_function_name(function: &str) -> String {
    function.replace(INTERNAL_NONDET_ALIAS, EXTERNAL_NONDET_ALIAS)
}

/// Consumes the whole record stream before returning.
pub fn aggregate<I>(items: I) -> AggregatedTrace
where
    I: IntoIterator<Item = TraceItem>,
{
    let mut aggregated = AggregatedTrace::default();
    for item in items {
        match item {
            Ok(record) => aggregated.record(record),
            Err(warning) => aggregated.warnings.push(warning),
        }
    }
    aggregated
}
