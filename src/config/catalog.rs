//! Static instrument catalog backed by the `[[instruments]]` table.

use std::collections::HashMap;

use crate::ports::instruments::{InstrumentCatalog, InstrumentSpec};

/// Read-only catalog built once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
  ordered: Vec<InstrumentSpec>,
  by_id: HashMap<String, usize>,
}

impl StaticCatalog {
  /// Index the given instruments by id; later duplicates are ignored.
  pub fn new(instruments: Vec<InstrumentSpec>) -> Self {
    let mut ordered = Vec::with_capacity(instruments.len());
    let mut by_id = HashMap::with_capacity(instruments.len());
    for spec in instruments {
      if by_id.contains_key(&spec.id) {
        continue;
      }
      by_id.insert(spec.id.clone(), ordered.len());
      ordered.push(spec);
    }
    Self { ordered, by_id }
  }
}

impl InstrumentCatalog for StaticCatalog {
  fn instrument(&self, id: &str) -> Option<InstrumentSpec> {
    self.by_id.get(id).map(|&i| self.ordered[i].clone())
  }

  fn instruments(&self) -> Vec<InstrumentSpec> {
    self.ordered.clone()
  }
}
