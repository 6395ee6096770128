use std::collections::BTreeMap;

use crate::abt::ProjectionName;

/// Deterministic fresh-name source scoped to one compilation.
///
/// Names are `<prefix>_<n>` with an independent counter per prefix, so the
/// same input tree always produces the same names.
#[derive(Debug, Clone, Default)]
pub struct NameGenerator {
    counters: BTreeMap<String, u64>,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate(&mut self, prefix: &str) -> ProjectionName {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}_{n}");
        *n += 1;
        ProjectionName::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_per_prefix() {
        let mut g = NameGenerator::new();
        assert_eq!(g.generate("valIn").as_str(), "valIn_0");
        assert_eq!(g.generate("valIn").as_str(), "valIn_1");
        assert_eq!(g.generate("fieldProj").as_str(), "fieldProj_0");
    }
}
