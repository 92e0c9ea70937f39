//! Collation of items into batches.

use crate::dataset::Dataset;
use crate::error::{DatasetError, Result};
use crate::parallel::{load_items_parallel, thread_pool};
use crate::sample::Item;
use crate::tensor::{NamedTensor, BATCH, TIMESTEP};

/// Items stacked along a leading `batch` axis
#[derive(Debug, Clone, PartialEq)]
pub struct ItemBatch {
    pub inputs: NamedTensor,
    pub outputs: NamedTensor,
    pub forcing: NamedTensor,
}

impl ItemBatch {
    pub fn batch_size(&self) -> Result<usize> {
        self.inputs.dim_size(BATCH)
    }

    pub fn num_input_steps(&self) -> Result<usize> {
        self.inputs.dim_size(TIMESTEP)
    }

    pub fn num_pred_steps(&self) -> Result<usize> {
        self.outputs.dim_size(TIMESTEP)
    }
}

/// Stack same-shaped items into one batch. Dimension names, feature names
/// and shapes must agree across items.
pub fn collate(items: &[Item]) -> Result<ItemBatch> {
    if items.is_empty() {
        return Err(DatasetError::configuration("Cannot collate an empty list of items"));
    }
    let gather = |pick: fn(&Item) -> &NamedTensor| -> Result<NamedTensor> {
        let tensors: Vec<NamedTensor> = items.iter().map(|item| pick(item).clone()).collect();
        NamedTensor::stack(&tensors, BATCH)
    };
    let batched = Item::new(
        gather(|i| &i.inputs)?,
        gather(|i| &i.outputs)?,
        gather(|i| &i.forcing)?,
    )?;
    Ok(ItemBatch {
        inputs: batched.inputs,
        outputs: batched.outputs,
        forcing: batched.forcing,
    })
}

/// Iterates over a dataset in batches, in the order of one epoch
pub struct BatchLoader<'a> {
    dataset: &'a Dataset,
    order: Vec<usize>,
    batch_size: usize,
    drop_last: bool,
    position: usize,
    pool: Option<rayon::ThreadPool>,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a Dataset, epoch: u64, batch_size: usize, drop_last: bool) -> Result<Self> {
        if batch_size == 0 {
            return Err(DatasetError::configuration("batch_size must be positive"));
        }
        Ok(Self {
            dataset,
            order: dataset.epoch_order(epoch),
            batch_size,
            drop_last,
            position: 0,
            pool: None,
        })
    }

    /// Load each batch on a dedicated pool of `num_workers` threads instead
    /// of the global rayon pool
    pub fn with_num_workers(mut self, num_workers: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(DatasetError::configuration("num_workers must be positive"));
        }
        self.pool = Some(thread_pool(num_workers)?);
        Ok(self)
    }

    pub fn num_batches(&self) -> usize {
        if self.drop_last {
            self.order.len() / self.batch_size
        } else {
            self.order.len().div_ceil(self.batch_size)
        }
    }
}

impl Iterator for BatchLoader<'_> {
    type Item = Result<ItemBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len() - self.position;
        if remaining == 0 || (self.drop_last && remaining < self.batch_size) {
            return None;
        }
        let dataset = self.dataset;
        let end = self.position + self.batch_size.min(remaining);
        let samples: Vec<_> = self.order[self.position..end]
            .iter()
            .map(|&i| &dataset.sample_list()[i])
            .collect();
        self.position = end;
        let items = match &self.pool {
            Some(pool) => pool.install(|| load_items_parallel(&samples)),
            None => load_items_parallel(&samples),
        };
        Some(items.and_then(|items| collate(&items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{FEATURES, LAT, LON};
    use ndarray::Array4;

    fn item(value: f32, features: &[&str]) -> Item {
        let nt = |steps: usize, feats: &[&str]| {
            NamedTensor::from_array(
                Array4::<f32>::from_elem((steps, 3, 2, feats.len()), value),
                &[TIMESTEP, LAT, LON, FEATURES],
                feats,
            )
            .unwrap()
        };
        Item::new(nt(2, features), nt(1, features), nt(1, &["cos_hour"])).unwrap()
    }

    #[test]
    fn test_collate_shape_law() {
        let items: Vec<Item> = (0..4).map(|i| item(i as f32, &["a", "b"])).collect();
        let batch = collate(&items).unwrap();
        assert_eq!(batch.inputs.shape(), &[4, 2, 3, 2, 2]);
        assert_eq!(batch.inputs.names(), &[BATCH, TIMESTEP, LAT, LON, FEATURES]);
        assert_eq!(batch.inputs.feature_names(), &["a", "b"]);
        assert_eq!(batch.batch_size().unwrap(), 4);
        assert_eq!(batch.num_input_steps().unwrap(), 2);
        assert_eq!(batch.num_pred_steps().unwrap(), 1);
        assert_eq!(batch.outputs.tensor()[&[3, 0, 0, 0, 1][..]], 3.0);
    }

    #[test]
    fn test_collate_rejects_feature_mismatch() {
        let items = vec![item(0.0, &["a", "b"]), item(0.0, &["a", "c"])];
        assert!(matches!(
            collate(&items),
            Err(DatasetError::ContractViolation { .. })
        ));
    }

    #[test]
    fn test_collate_empty() {
        assert!(collate(&[]).is_err());
    }
}
