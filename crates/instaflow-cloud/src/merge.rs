//! Drift merge
//!
//! Folds a freshly read server snapshot into the locally tracked model.
//! Computed fields (ids, status, assigned addresses) always follow the
//! server. Settable fields follow the server too, since none of the
//! supported resources can be updated in place, but a change to one is
//! recorded as drift so the caller can plan a replacement. A field the
//! server did not report leaves the local value untouched.

/// Merges a server snapshot into a locally tracked model.
///
/// Implementations must be idempotent: merging the same snapshot a second
/// time returns an unchanged [`MergeReport`].
pub trait DriftMerge {
    type Snapshot;

    fn merge(&mut self, snapshot: &Self::Snapshot) -> MergeReport;
}

/// Declared intent that can only be changed by replacing the resource.
pub trait ForceNew {
    /// Declared fields of `self` that differ from `declared`.
    fn replacement_fields(&self, declared: &Self) -> Vec<&'static str>;
}

/// Fields changed by one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    computed: Vec<&'static str>,
    drifted: Vec<&'static str>,
}

impl MergeReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a server-owned field with the observed value.
    pub fn computed<T: PartialEq>(&mut self, name: &'static str, field: &mut T, observed: Option<T>) {
        if replace(field, observed, |a, b| a == b) {
            self.computed.push(name);
        }
    }

    /// Overwrite a user-declared field when the server disagrees with it.
    pub fn settable<T: PartialEq>(&mut self, name: &'static str, field: &mut T, observed: Option<T>) {
        self.settable_by(name, field, observed, |a, b| a == b);
    }

    /// Like [`MergeReport::settable`] with a custom notion of equality, for
    /// collections whose order is insignificant.
    pub fn settable_by<T>(
        &mut self,
        name: &'static str,
        field: &mut T,
        observed: Option<T>,
        same: impl Fn(&T, &T) -> bool,
    ) {
        if replace(field, observed, same) {
            tracing::debug!(field = name, "Declared field drifted from server state");
            self.drifted.push(name);
        }
    }

    /// Computed fields that changed.
    pub fn computed_fields(&self) -> &[&'static str] {
        &self.computed
    }

    /// Settable fields whose declared value diverged from the server.
    pub fn drifted(&self) -> &[&'static str] {
        &self.drifted
    }

    pub fn has_drift(&self) -> bool {
        !self.drifted.is_empty()
    }

    pub fn is_unchanged(&self) -> bool {
        self.computed.is_empty() && self.drifted.is_empty()
    }
}

fn replace<T>(field: &mut T, observed: Option<T>, same: impl Fn(&T, &T) -> bool) -> bool {
    match observed {
        Some(value) if !same(field, &value) => {
            *field = value;
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Model {
        id: String,
        status: Option<String>,
        name: String,
        tags: Vec<String>,
    }

    struct Snapshot {
        id: String,
        status: Option<String>,
        name: Option<String>,
        tags: Vec<String>,
    }

    impl DriftMerge for Model {
        type Snapshot = Snapshot;

        fn merge(&mut self, snapshot: &Snapshot) -> MergeReport {
            let mut report = MergeReport::new();
            report.computed("id", &mut self.id, Some(snapshot.id.clone()));
            report.computed("status", &mut self.status, snapshot.status.clone().map(Some));
            report.settable("name", &mut self.name, snapshot.name.clone());
            report.settable_by("tags", &mut self.tags, Some(snapshot.tags.clone()), |a, b| {
                let mut a = a.clone();
                let mut b = b.clone();
                a.sort();
                b.sort();
                a == b
            });
            report
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            id: "X123".to_string(),
            status: Some("RUNNING".to_string()),
            name: Some("c1".to_string()),
            tags: vec!["b".to_string(), "a".to_string()],
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut model = Model {
            name: "c1".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };

        let first = model.merge(&snapshot());
        let after_first = model.clone();
        let second = model.merge(&snapshot());

        assert_eq!(first.computed_fields(), &["id", "status"]);
        assert!(!first.has_drift());
        assert!(second.is_unchanged());
        assert_eq!(model, after_first);
    }

    #[test]
    fn test_settable_divergence_is_drift() {
        let mut model = Model {
            name: "old-name".to_string(),
            ..Default::default()
        };

        let report = model.merge(&snapshot());

        assert_eq!(report.drifted(), &["name", "tags"]);
        assert_eq!(model.name, "c1");
    }

    #[test]
    fn test_absent_server_field_keeps_declared_value() {
        let mut model = Model {
            name: "c1".to_string(),
            status: Some("PROVISIONING".to_string()),
            ..Default::default()
        };
        let snapshot = Snapshot {
            name: None,
            status: None,
            ..snapshot()
        };

        model.merge(&snapshot);

        assert_eq!(model.name, "c1");
        assert_eq!(model.status.as_deref(), Some("PROVISIONING"));
    }
}
