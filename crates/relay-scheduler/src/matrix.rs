//! Matrix expansion into job instances.

use indexmap::IndexMap;
use relay_core::DefinitionError;
use relay_core::ids::RunId;
use relay_core::run::JobInstance;
use relay_core::workflow::{JobTemplate, MatrixSpec};
use serde_json::Value;

/// One combination of axis values.
pub type MatrixCell = IndexMap<String, Value>;

/// Expands a template's matrix into one instance per cell.
pub struct MatrixExpander {
    max_size: usize,
}

impl MatrixExpander {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Instances for a template. A template without a matrix yields exactly one.
    pub fn expand(
        &self,
        run_id: RunId,
        template: &JobTemplate,
    ) -> Result<Vec<JobInstance>, DefinitionError> {
        Ok(self
            .cells(template)?
            .into_iter()
            .map(|cell| JobInstance::new(run_id, &template.name, cell))
            .collect())
    }

    /// The matrix cells of a template, in declaration order.
    pub fn cells(&self, template: &JobTemplate) -> Result<Vec<MatrixCell>, DefinitionError> {
        let Some(matrix) = &template.matrix else {
            return Ok(vec![MatrixCell::new()]);
        };

        for (axis, values) in &matrix.axes {
            if values.is_empty() {
                return Err(DefinitionError::EmptyMatrixAxis {
                    job: template.name.clone(),
                    axis: axis.clone(),
                });
            }
        }

        // Size the product before building it.
        let product = matrix
            .axes
            .values()
            .try_fold(1usize, |acc, values| acc.checked_mul(values.len()))
            .unwrap_or(usize::MAX);
        self.check_size(template, product)?;

        let mut combinations = self.generate_combinations(matrix);

        combinations.retain(|combo| {
            !matrix
                .exclude
                .iter()
                .any(|exclude| matches_entry(combo, exclude))
        });

        for include in &matrix.include {
            if !combinations.contains(include) {
                combinations.push(include.clone());
            }
        }

        self.check_size(template, combinations.len())?;
        Ok(combinations)
    }

    fn generate_combinations(&self, matrix: &MatrixSpec) -> Vec<MatrixCell> {
        if matrix.axes.is_empty() {
            // Only includes define cells; with none the template runs once.
            return if matrix.include.is_empty() {
                vec![MatrixCell::new()]
            } else {
                Vec::new()
            };
        }

        let mut result = vec![MatrixCell::new()];
        for (key, values) in &matrix.axes {
            let mut next = Vec::with_capacity(result.len() * values.len());
            for combo in &result {
                for value in values {
                    let mut cell = combo.clone();
                    cell.insert(key.clone(), value.clone());
                    next.push(cell);
                }
            }
            result = next;
        }
        result
    }

    fn check_size(&self, template: &JobTemplate, size: usize) -> Result<(), DefinitionError> {
        if size > self.max_size {
            return Err(DefinitionError::MatrixTooLarge {
                job: template.name.clone(),
                size,
                limit: self.max_size,
            });
        }
        Ok(())
    }
}

/// True when every key of `entry` is present in `combo` with the same value.
fn matches_entry(combo: &MatrixCell, entry: &MatrixCell) -> bool {
    entry.iter().all(|(key, value)| combo.get(key) == Some(value))
}
