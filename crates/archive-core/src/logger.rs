//! Structured logger hook contract.
//!
//! Grounded on `internal/ctxlogger/ctxlogger.go`: the core accumulates
//! before/after hook pairs without knowing who will eventually emit them.
//! The external request layer runs `before` hooks ahead of a handler and
//! `after` hooks following it, letting the core attach fields (start time,
//! job id, queue name) to a span without owning how it's printed.

use tracing::span::Span;

/// A single field attached by a hook, to be recorded onto whatever span the
/// caller is building.
#[derive(Debug, Clone)]
pub struct LogField {
    pub key: &'static str,
    pub value: String,
}

impl LogField {
    pub fn new(key: &'static str, value: impl ToString) -> Self {
        LogField {
            key,
            value: value.to_string(),
        }
    }
}

/// A function invoked before or after the hooked operation, given the fields
/// accumulated so far, returning fields to add.
pub type HookFn = Box<dyn Fn(&[LogField]) -> Vec<LogField> + Send + Sync>;

/// A before/after pair. `before` runs ahead of the operation; `after` runs
/// once it completes. Either half may be absent.
pub struct HookPair {
    before: Option<HookFn>,
    after: Option<HookFn>,
}

impl HookPair {
    pub fn new(before: Option<HookFn>, after: Option<HookFn>) -> Self {
        HookPair { before, after }
    }

    fn run_before(&self, fields: &[LogField]) -> Vec<LogField> {
        self.before.as_ref().map(|f| f(fields)).unwrap_or_default()
    }

    fn run_after(&self, fields: &[LogField]) -> Vec<LogField> {
        self.after.as_ref().map(|f| f(fields)).unwrap_or_default()
    }
}

/// An append-only list of hook pairs, run in registration order.
#[derive(Default)]
pub struct LoggerHooks {
    hooks: Vec<HookPair>,
}

impl LoggerHooks {
    pub fn new() -> Self {
        LoggerHooks::default()
    }

    /// Register another hook pair. Hooks accumulate; nothing is ever removed.
    pub fn add(&mut self, pair: HookPair) {
        self.hooks.push(pair);
    }

    /// Run every `before` hook in order, folding each hook's output into the
    /// accumulated field list.
    pub fn run_before(&self) -> Vec<LogField> {
        let mut fields = Vec::new();
        for hook in &self.hooks {
            fields.extend(hook.run_before(&fields.clone()));
        }
        fields
    }

    /// Run every `after` hook in order, given the fields accumulated by
    /// `run_before` (and whatever the caller added since).
    pub fn run_after(&self, fields: &[LogField]) -> Vec<LogField> {
        let mut all = fields.to_vec();
        for hook in &self.hooks {
            all.extend(hook.run_after(&all.clone()));
        }
        all
    }
}

/// Record a batch of [`LogField`]s onto a live `tracing` span, matching the
/// way the original attaches `logrus.Fields` to a `FieldLogger`. This is
/// additive instrumentation on top of the hook contract, not a change to it:
/// the hooks decide *what* gets attached, this only decides *where*.
pub fn record_fields(span: &Span, fields: &[LogField]) {
    for field in fields {
        span.record(field.key, field.value.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hooks_run_in_registration_order_and_accumulate() {
        let mut hooks = LoggerHooks::new();
        hooks.add(HookPair::new(
            Some(Box::new(|_fields| vec![LogField::new("job_id", 1)])),
            Some(Box::new(|_fields| vec![LogField::new("finished", true)])),
        ));
        hooks.add(HookPair::new(
            Some(Box::new(|fields| {
                vec![LogField::new("saw_job_id", fields.iter().any(|f| f.key == "job_id"))]
            })),
            None,
        ));

        let before = hooks.run_before();
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].key, "job_id");
        assert_eq!(before[1].value, "true");

        let after = hooks.run_after(&before);
        assert!(after.iter().any(|f| f.key == "finished"));
    }
}
