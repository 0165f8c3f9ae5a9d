//! Descriptor pool budgeting and allocation.
//!
//! A [`PoolBudget`] mirrors the capacity a descriptor pool was created with
//! and is charged in whole batches: either every set in the batch fits the
//! remaining per-type and set counters, or nothing is deducted. Partial
//! charges with rollback are deliberately not supported.

use std::collections::BTreeMap;

use ash::vk;
use tracing::debug;

use crate::error::{GpuError, Result};

/// Remaining descriptor capacity, by type plus a set counter.
#[derive(Debug, Clone)]
pub struct PoolBudget {
    remaining: BTreeMap<vk::DescriptorType, u32>,
    remaining_sets: u32,
}

impl PoolBudget {
    /// Initialize from the sizes a pool was created with. Repeated types are
    /// summed.
    pub fn new(pool_sizes: &[vk::DescriptorPoolSize], max_sets: u32) -> Self {
        let mut remaining = BTreeMap::new();
        for size in pool_sizes {
            *remaining.entry(size.ty).or_insert(0) += size.descriptor_count;
        }
        Self {
            remaining,
            remaining_sets: max_sets,
        }
    }

    /// Descriptors of one type still available.
    pub fn remaining(&self, ty: vk::DescriptorType) -> u32 {
        self.remaining.get(&ty).copied().unwrap_or(0)
    }

    /// Sets still available.
    pub fn remaining_sets(&self) -> u32 {
        self.remaining_sets
    }

    fn batch_demand(batch: &[&[vk::DescriptorPoolSize]]) -> BTreeMap<vk::DescriptorType, u32> {
        let mut demand = BTreeMap::new();
        for set in batch {
            for size in *set {
                *demand.entry(size.ty).or_insert(0) += size.descriptor_count;
            }
        }
        demand
    }

    /// Verify the whole batch fits without deducting anything.
    pub fn check(&self, batch: &[&[vk::DescriptorPoolSize]]) -> Result<()> {
        let requested_sets = u32::try_from(batch.len()).unwrap_or(u32::MAX);
        if requested_sets > self.remaining_sets {
            return Err(GpuError::PoolExhausted(format!(
                "batch requests {requested_sets} sets, {} remaining",
                self.remaining_sets
            )));
        }
        for (ty, count) in Self::batch_demand(batch) {
            let available = self.remaining(ty);
            if count > available {
                return Err(GpuError::PoolExhausted(format!(
                    "batch requests {count} descriptors of type {ty:?}, {available} remaining"
                )));
            }
        }
        Ok(())
    }

    /// Charge the whole batch, or fail with `PoolExhausted` leaving every
    /// counter untouched.
    pub fn charge(&mut self, batch: &[&[vk::DescriptorPoolSize]]) -> Result<()> {
        self.check(batch)?;
        for (ty, count) in Self::batch_demand(batch) {
            if let Some(available) = self.remaining.get_mut(&ty) {
                *available -= count;
            }
        }
        self.remaining_sets -= u32::try_from(batch.len()).unwrap_or(u32::MAX);
        Ok(())
    }
}

/// A descriptor pool paired with its budget ledger.
pub struct BudgetedDescriptorPool {
    pool: vk::DescriptorPool,
    budget: PoolBudget,
}

impl BudgetedDescriptorPool {
    /// Create a pool and the matching budget.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        pool_sizes: &[vk::DescriptorPoolSize],
        max_sets: u32,
    ) -> Result<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self {
            pool,
            budget: PoolBudget::new(pool_sizes, max_sets),
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    pub fn budget(&self) -> &PoolBudget {
        &self.budget
    }

    /// Allocate one descriptor set per layout. `demands[i]` is the per-type
    /// demand of `layouts[i]` (see
    /// [`PipelineLayout::pool_sizes_for_set`](crate::layout::PipelineLayout::pool_sizes_for_set)).
    ///
    /// The budget is checked for the whole batch before the driver call and
    /// committed only after it succeeds.
    ///
    /// # Safety
    /// The device must be valid and the layouts must belong to it.
    pub unsafe fn allocate(
        &mut self,
        device: &ash::Device,
        layouts: &[vk::DescriptorSetLayout],
        demands: &[&[vk::DescriptorPoolSize]],
    ) -> Result<Vec<vk::DescriptorSet>> {
        if layouts.len() != demands.len() {
            return Err(GpuError::PoolExhausted(format!(
                "{} layouts but {} demand entries",
                layouts.len(),
                demands.len()
            )));
        }
        self.budget.check(demands)?;

        let allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);
        let sets = device.allocate_descriptor_sets(&allocate_info)?;

        self.budget.charge(demands)?;
        debug!(
            sets = sets.len(),
            remaining_sets = self.budget.remaining_sets(),
            "allocated descriptor sets"
        );
        Ok(sets)
    }

    /// Destroy the pool and every set allocated from it.
    ///
    /// # Safety
    /// The device must be valid and no set from this pool may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}
