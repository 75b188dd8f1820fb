//! Target gallery, the ordered set of enrolled identities.

use crate::types::TargetRecord;

/// What happens when a record is added under a name already in the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Entries with the same name live side by side; the best-scoring one wins.
    #[default]
    Coexist,
    /// Earlier entries with the same name are dropped before the new one is appended.
    Replace,
}

/// Append-only collection of [`TargetRecord`]s, scanned in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    entries: Vec<TargetRecord>,
    policy: DuplicatePolicy,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Append one record.
    pub fn add(&mut self, record: TargetRecord) {
        if self.policy == DuplicatePolicy::Replace {
            let before = self.entries.len();
            self.entries.retain(|e| e.name() != record.name());
            let dropped = before - self.entries.len();
            if dropped > 0 {
                tracing::debug!(name = record.name(), dropped, "replacing gallery entries");
            }
        }
        self.entries.push(record);
    }

    /// Append a batch, preserving its order.
    pub fn add_all<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = TargetRecord>,
    {
        for record in records {
            self.add(record);
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TargetRecord> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[TargetRecord] {
        &self.entries
    }
}

impl<'a> IntoIterator for &'a Gallery {
    type Item = &'a TargetRecord;
    type IntoIter = std::slice::Iter<'a, TargetRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl FromIterator<TargetRecord> for Gallery {
    fn from_iter<I: IntoIterator<Item = TargetRecord>>(iter: I) -> Self {
        let mut gallery = Gallery::new();
        gallery.add_all(iter);
        gallery
    }
}
