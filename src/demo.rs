//! A toy payload for trying the broker end to end.
//!
//! The payload is a JSON array of coordinates; its fitness is the value of
//! the parabola `sum(x_i^2)` at that point, so the optimum is the origin.

use crate::consumer::Evaluator;
use crate::error::{Error, Result};
use crate::model::WorkItem;

/// Evaluates parabola candidates.
#[derive(Debug, Default, Clone, Copy)]
pub struct Parabola;

impl Evaluator for Parabola {
    fn evaluate(&self, item: &mut WorkItem) -> Result<()> {
        let point = decode(&item.payload)?;
        item.set_fitness(point.iter().map(|x| x * x).sum());
        Ok(())
    }
}

/// A fresh work item for the point `coordinates`.
pub fn candidate(coordinates: &[f64]) -> Result<WorkItem> {
    let payload = serde_json::to_vec(coordinates)
        .map_err(|e| Error::Evaluation(format!("encode candidate: {e}")))?;
    Ok(WorkItem::new(payload))
}

pub fn decode(payload: &[u8]) -> Result<Vec<f64>> {
    serde_json::from_slice(payload).map_err(|e| Error::Evaluation(format!("decode candidate: {e}")))
}
