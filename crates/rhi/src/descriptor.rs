//! Descriptor layouts, pools, and the pool manager.
//!
//! Three layers live here:
//! - CPU-side layout descriptions ([`BindingDesc`], [`DescriptorSetLayoutInfo`])
//!   that shader reflection merges into, and the per-type resource counting
//!   ([`DescriptorCounts`]) derived from them;
//! - thin wrappers over VkDescriptorSetLayout and VkDescriptorPool;
//! - the [`DescriptorPoolManager`], which tracks a growable set of
//!   fixed-capacity pools and routes allocations to the first pool with
//!   enough remaining per-type capacity. It is the one structure in the
//!   engine built for concurrent access: material setup may allocate sets
//!   while a frame is being recorded.

use std::sync::{Arc, Mutex};

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Number of descriptor types a pool tracks capacity for.
pub const DESCRIPTOR_TYPE_COUNT: usize = 11;

/// Sets per freshly created pool.
pub const MAX_SETS_PER_POOL: u32 = 1000;

/// Per-type descriptor capacity of a freshly created pool.
pub const POOL_TYPE_CAPACITY: u32 = 100;

/// Maps a descriptor type to its slot in a [`DescriptorCounts`] array.
pub fn descriptor_type_index(ty: vk::DescriptorType) -> Option<usize> {
    match ty {
        vk::DescriptorType::SAMPLER => Some(0),
        vk::DescriptorType::COMBINED_IMAGE_SAMPLER => Some(1),
        vk::DescriptorType::SAMPLED_IMAGE => Some(2),
        vk::DescriptorType::STORAGE_IMAGE => Some(3),
        vk::DescriptorType::UNIFORM_TEXEL_BUFFER => Some(4),
        vk::DescriptorType::STORAGE_TEXEL_BUFFER => Some(5),
        vk::DescriptorType::UNIFORM_BUFFER => Some(6),
        vk::DescriptorType::STORAGE_BUFFER => Some(7),
        vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => Some(8),
        vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => Some(9),
        vk::DescriptorType::INPUT_ATTACHMENT => Some(10),
        _ => None,
    }
}

/// The descriptor type for each [`DescriptorCounts`] slot, in order.
const DESCRIPTOR_TYPES: [vk::DescriptorType; DESCRIPTOR_TYPE_COUNT] = [
    vk::DescriptorType::SAMPLER,
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::SAMPLED_IMAGE,
    vk::DescriptorType::STORAGE_IMAGE,
    vk::DescriptorType::UNIFORM_TEXEL_BUFFER,
    vk::DescriptorType::STORAGE_TEXEL_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::STORAGE_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
    vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
    vk::DescriptorType::INPUT_ATTACHMENT,
];

/// Per-descriptor-type resource counts for one descriptor set layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DescriptorCounts(pub [u32; DESCRIPTOR_TYPE_COUNT]);

impl DescriptorCounts {
    /// Adds `count` descriptors of the given type.
    ///
    /// Unknown (extension) descriptor types are ignored with a warning; the
    /// pool manager cannot budget for them.
    pub fn add(&mut self, ty: vk::DescriptorType, count: u32) {
        match descriptor_type_index(ty) {
            Some(index) => self.0[index] += count,
            None => warn!("Ignoring untracked descriptor type {:?}", ty),
        }
    }

    /// Returns these counts multiplied by a set count.
    pub fn scaled(&self, multiplier: u32) -> Self {
        let mut scaled = *self;
        for value in &mut scaled.0 {
            *value *= multiplier;
        }
        scaled
    }

    /// True when every count is zero.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&count| count == 0)
    }

    /// Sum of all counts, for diagnostics.
    pub fn total(&self) -> u32 {
        self.0.iter().sum()
    }
}

/// One binding of a descriptor set layout.
#[derive(Clone, Debug)]
pub struct BindingDesc {
    /// Binding index within the set.
    pub binding: u32,
    /// Descriptor type.
    pub ty: vk::DescriptorType,
    /// Number of descriptors (array size).
    pub count: u32,
    /// Shader stages that access this binding.
    pub stages: vk::ShaderStageFlags,
    /// Name declared in the shader, for merge diagnostics.
    pub name: String,
}

/// CPU-side description of one descriptor set layout.
///
/// Built up by merging every shader stage's reflected bindings; the vk
/// object is created once the pass layout is complete.
#[derive(Clone, Debug, Default)]
pub struct DescriptorSetLayoutInfo {
    /// Set index this layout occupies in the pipeline layout.
    pub set: u32,
    /// Bindings, kept sorted by binding index.
    pub bindings: Vec<BindingDesc>,
}

impl DescriptorSetLayoutInfo {
    /// Creates an empty layout info for the given set index.
    pub fn new(set: u32) -> Self {
        Self {
            set,
            bindings: Vec::new(),
        }
    }

    /// Finds the binding at `binding`, or inserts `desc`.
    ///
    /// When the binding already exists with the same name and type, the new
    /// stage flags are OR'ed in. A name or type mismatch on the same binding
    /// index is tolerated with a warning and the existing declaration wins;
    /// shader authors hit this when two stages disagree on a shared set.
    pub fn merge_binding(&mut self, desc: BindingDesc) {
        if let Some(existing) = self
            .bindings
            .iter_mut()
            .find(|b| b.binding == desc.binding)
        {
            if existing.name == desc.name && existing.ty == desc.ty {
                existing.stages |= desc.stages;
            } else {
                warn!(
                    "Duplicate binding {} in set {}: '{}' ({:?}) vs '{}' ({:?}); keeping the first",
                    desc.binding, self.set, existing.name, existing.ty, desc.name, desc.ty
                );
            }
            return;
        }

        let position = self
            .bindings
            .iter()
            .position(|b| b.binding > desc.binding)
            .unwrap_or(self.bindings.len());
        self.bindings.insert(position, desc);
    }

    /// Derives the per-type resource counts of this layout.
    pub fn resource_counts(&self) -> DescriptorCounts {
        let mut counts = DescriptorCounts::default();
        for binding in &self.bindings {
            counts.add(binding.ty, binding.count);
        }
        counts
    }
}

/// Descriptor set layout wrapper.
///
/// Immutable after creation; shared via `Arc` between the pass that built it
/// and the resource sets allocated against it.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
    info: DescriptorSetLayoutInfo,
    counts: DescriptorCounts,
}

impl DescriptorSetLayout {
    /// Creates the vk layout from a completed layout description.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(device: Arc<Device>, info: DescriptorSetLayoutInfo) -> RhiResult<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = info
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.ty)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout (set {}, {} binding(s))",
            info.set,
            info.bindings.len()
        );

        let counts = info.resource_counts();
        Ok(Self {
            device,
            layout,
            info,
            counts,
        })
    }

    /// Returns the Vulkan layout handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// Returns the layout description.
    #[inline]
    pub fn info(&self) -> &DescriptorSetLayoutInfo {
        &self.info
    }

    /// Returns the per-type resource counts of one set of this layout.
    #[inline]
    pub fn counts(&self) -> &DescriptorCounts {
        &self.counts
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool wrapper.
///
/// Created with `FREE_DESCRIPTOR_SET` so individual sets can be returned to
/// the pool when a material is destroyed.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a new descriptor pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, {} pool size(s)",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one descriptor set per layout handle given.
    ///
    /// # Errors
    ///
    /// Returns an error if the device-side allocation fails.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        Ok(sets)
    }

    /// Returns descriptor sets to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if freeing fails.
    ///
    /// # Safety
    ///
    /// The caller must ensure the sets are not referenced by in-flight work.
    pub fn free(&self, sets: &[vk::DescriptorSet]) -> RhiResult<()> {
        unsafe {
            self.device.handle().free_descriptor_sets(self.pool, sets)?;
        }
        Ok(())
    }

    /// Returns the Vulkan pool handle.
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Returns the set capacity this pool was created with.
    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Remaining capacity of one pool.
#[derive(Clone, Copy, Debug)]
pub struct PoolInfo {
    /// Sets still available in the pool.
    pub remaining_sets: u32,
    /// Descriptors still available per type.
    pub remaining: DescriptorCounts,
}

impl PoolInfo {
    /// Full capacity of a freshly created pool.
    pub fn fresh() -> Self {
        Self {
            remaining_sets: MAX_SETS_PER_POOL,
            remaining: DescriptorCounts([POOL_TYPE_CAPACITY; DESCRIPTOR_TYPE_COUNT]),
        }
    }

    /// True when the pool can hold `sets` sets consuming `counts` descriptors
    /// in total.
    pub fn can_satisfy(&self, counts: &DescriptorCounts, sets: u32) -> bool {
        self.remaining_sets >= sets
            && self
                .remaining
                .0
                .iter()
                .zip(counts.0.iter())
                .all(|(have, need)| have >= need)
    }

    /// Subtracts an allocation from the remaining capacity.
    ///
    /// The caller checks `can_satisfy` first; no counter may go negative.
    pub fn reserve(&mut self, counts: &DescriptorCounts, sets: u32) {
        debug_assert!(self.can_satisfy(counts, sets));
        self.remaining_sets -= sets;
        for (have, need) in self.remaining.0.iter_mut().zip(counts.0.iter()) {
            *have -= need;
        }
    }

    /// Restores a freed allocation into the remaining capacity.
    ///
    /// Must be called with the same counts used at allocation time.
    pub fn release(&mut self, counts: &DescriptorCounts, sets: u32) {
        self.remaining_sets += sets;
        for (have, freed) in self.remaining.0.iter_mut().zip(counts.0.iter()) {
            *have += freed;
        }
    }
}

/// True when a freshly created pool could hold this request at all.
fn fits_fresh_pool(counts: &DescriptorCounts, sets: u32) -> bool {
    PoolInfo::fresh().can_satisfy(counts, sets)
}

struct PoolEntry {
    pool: Arc<DescriptorPool>,
    info: PoolInfo,
}

/// A descriptor-set allocation with its owning pool.
///
/// Frees must be routed back through [`DescriptorPoolManager::free_sets`] so
/// the owning pool's counters are restored.
pub struct DescriptorSetAllocation {
    /// The allocated sets, one per requested set.
    pub sets: Vec<vk::DescriptorSet>,
    /// Owning pool.
    pub pool: Arc<DescriptorPool>,
    /// Per-set resource counts, as reserved.
    counts: DescriptorCounts,
}

/// Tracks a growable collection of descriptor pools.
///
/// All search/allocate/free operations are mutually exclusive under one
/// lock; descriptor sets are created from multiple call sites (material
/// setup, pass construction) that may run concurrently with frame recording.
pub struct DescriptorPoolManager {
    device: Arc<Device>,
    pools: Mutex<Vec<PoolEntry>>,
}

impl DescriptorPoolManager {
    /// Creates a manager with no pools; pools are created on demand.
    pub fn new(device: Arc<Device>) -> Self {
        Self {
            device,
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Allocates `set_count` descriptor sets of the given layout.
    ///
    /// Scans pools in creation order for the first whose remaining set and
    /// per-type capacity satisfies the request; creates a new
    /// fixed-capacity pool when none qualifies.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Configuration`] when the request exceeds what a
    /// fresh pool can hold (the request can never succeed), or a Vulkan
    /// error from pool/set creation.
    pub fn allocate_sets(
        &self,
        layout: &DescriptorSetLayout,
        set_count: u32,
    ) -> RhiResult<DescriptorSetAllocation> {
        let per_set = *layout.counts();
        let total = per_set.scaled(set_count);

        if !fits_fresh_pool(&total, set_count) {
            return Err(RhiError::Configuration(format!(
                "descriptor request ({} sets, {} descriptors) exceeds a pool's maximum capacity",
                set_count,
                total.total()
            )));
        }

        let mut pools = self.pools.lock().unwrap();

        let index = match pools.iter().position(|p| p.info.can_satisfy(&total, set_count)) {
            Some(index) => index,
            None => {
                let pool_sizes: Vec<vk::DescriptorPoolSize> = DESCRIPTOR_TYPES
                    .iter()
                    .map(|&ty| {
                        vk::DescriptorPoolSize::default()
                            .ty(ty)
                            .descriptor_count(POOL_TYPE_CAPACITY)
                    })
                    .collect();
                let pool =
                    DescriptorPool::new(self.device.clone(), MAX_SETS_PER_POOL, &pool_sizes)?;
                pools.push(PoolEntry {
                    pool: Arc::new(pool),
                    info: PoolInfo::fresh(),
                });
                pools.len() - 1
            }
        };

        let layouts = vec![layout.handle(); set_count as usize];
        let sets = pools[index].pool.allocate(&layouts)?;
        pools[index].info.reserve(&total, set_count);

        Ok(DescriptorSetAllocation {
            sets,
            pool: pools[index].pool.clone(),
            counts: per_set,
        })
    }

    /// Frees an allocation back into its owning pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the device-side free fails.
    pub fn free_sets(&self, allocation: DescriptorSetAllocation) -> RhiResult<()> {
        let set_count = allocation.sets.len() as u32;
        let total = allocation.counts.scaled(set_count);

        let mut pools = self.pools.lock().unwrap();
        allocation.pool.free(&allocation.sets)?;

        if let Some(entry) = pools
            .iter_mut()
            .find(|p| p.pool.handle() == allocation.pool.handle())
        {
            entry.info.release(&total, set_count);
        } else {
            warn!("Freed descriptor sets into an unknown pool");
        }
        Ok(())
    }

    /// Number of pools created so far.
    pub fn pool_count(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}

/// Applies a batch of write-descriptor operations.
pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet]) {
    if writes.is_empty() {
        return;
    }
    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(vk::DescriptorType, u32)]) -> DescriptorCounts {
        let mut counts = DescriptorCounts::default();
        for &(ty, n) in pairs {
            counts.add(ty, n);
        }
        counts
    }

    #[test]
    fn test_descriptor_type_index_covers_all_tracked_types() {
        for (expected, &ty) in DESCRIPTOR_TYPES.iter().enumerate() {
            assert_eq!(descriptor_type_index(ty), Some(expected));
        }
        assert_eq!(
            descriptor_type_index(vk::DescriptorType::INLINE_UNIFORM_BLOCK),
            None
        );
    }

    #[test]
    fn test_counts_scaled() {
        let base = counts(&[(vk::DescriptorType::UNIFORM_BUFFER, 2)]);
        let scaled = base.scaled(3);
        assert_eq!(scaled.0[6], 6);
        assert_eq!(scaled.total(), 6);
    }

    #[test]
    fn test_merge_binding_ors_stages() {
        let mut info = DescriptorSetLayoutInfo::new(0);
        info.merge_binding(BindingDesc {
            binding: 0,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            name: "camera".into(),
        });
        info.merge_binding(BindingDesc {
            binding: 0,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
            name: "camera".into(),
        });

        assert_eq!(info.bindings.len(), 1);
        assert_eq!(
            info.bindings[0].stages,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_merge_binding_mismatch_keeps_first() {
        let mut info = DescriptorSetLayoutInfo::new(0);
        info.merge_binding(BindingDesc {
            binding: 1,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            name: "camera".into(),
        });
        // Same binding index, different name and type: warn and continue.
        info.merge_binding(BindingDesc {
            binding: 1,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 1,
            stages: vk::ShaderStageFlags::FRAGMENT,
            name: "albedo".into(),
        });

        assert_eq!(info.bindings.len(), 1);
        assert_eq!(info.bindings[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(info.bindings[0].stages, vk::ShaderStageFlags::VERTEX);
    }

    #[test]
    fn test_merge_binding_keeps_sorted_order() {
        let mut info = DescriptorSetLayoutInfo::new(0);
        for binding in [3u32, 0, 2] {
            info.merge_binding(BindingDesc {
                binding,
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::VERTEX,
                name: format!("b{binding}"),
            });
        }
        let order: Vec<u32> = info.bindings.iter().map(|b| b.binding).collect();
        assert_eq!(order, vec![0, 2, 3]);
    }

    #[test]
    fn test_layout_resource_counts() {
        let mut info = DescriptorSetLayoutInfo::new(0);
        info.merge_binding(BindingDesc {
            binding: 0,
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            count: 1,
            stages: vk::ShaderStageFlags::VERTEX,
            name: "camera".into(),
        });
        info.merge_binding(BindingDesc {
            binding: 1,
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count: 4,
            stages: vk::ShaderStageFlags::FRAGMENT,
            name: "textures".into(),
        });

        let counts = info.resource_counts();
        assert_eq!(counts.0[6], 1);
        assert_eq!(counts.0[1], 4);
    }

    #[test]
    fn test_pool_info_reserve_release_conservation() {
        // Sum of remaining + outstanding must equal original capacity across
        // an arbitrary allocate/free sequence.
        let original = PoolInfo::fresh();
        let mut pool = PoolInfo::fresh();

        let a = counts(&[
            (vk::DescriptorType::UNIFORM_BUFFER, 6),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 3),
        ]);
        let b = counts(&[(vk::DescriptorType::STORAGE_BUFFER, 10)]);

        let mut outstanding = DescriptorCounts::default();
        let mut outstanding_sets = 0u32;

        let mut check = |pool: &PoolInfo, outstanding: &DescriptorCounts, sets: u32| {
            assert_eq!(pool.remaining_sets + sets, original.remaining_sets);
            for i in 0..DESCRIPTOR_TYPE_COUNT {
                assert_eq!(
                    pool.remaining.0[i] + outstanding.0[i],
                    original.remaining.0[i]
                );
            }
        };

        for round in 0..3 {
            assert!(pool.can_satisfy(&a.scaled(2), 2));
            pool.reserve(&a.scaled(2), 2);
            for i in 0..DESCRIPTOR_TYPE_COUNT {
                outstanding.0[i] += a.scaled(2).0[i];
            }
            outstanding_sets += 2;
            check(&pool, &outstanding, outstanding_sets);

            pool.reserve(&b, 1);
            for i in 0..DESCRIPTOR_TYPE_COUNT {
                outstanding.0[i] += b.0[i];
            }
            outstanding_sets += 1;
            check(&pool, &outstanding, outstanding_sets);

            if round % 2 == 0 {
                pool.release(&a.scaled(2), 2);
                for i in 0..DESCRIPTOR_TYPE_COUNT {
                    outstanding.0[i] -= a.scaled(2).0[i];
                }
                outstanding_sets -= 2;
                check(&pool, &outstanding, outstanding_sets);
            }
        }
    }

    #[test]
    fn test_can_satisfy_rejects_overcommit() {
        let mut pool = PoolInfo::fresh();
        let big = counts(&[(vk::DescriptorType::UNIFORM_BUFFER, POOL_TYPE_CAPACITY)]);
        assert!(pool.can_satisfy(&big, 1));
        pool.reserve(&big, 1);
        let one_more = counts(&[(vk::DescriptorType::UNIFORM_BUFFER, 1)]);
        assert!(!pool.can_satisfy(&one_more, 1));
        // Other types are untouched.
        let sampler = counts(&[(vk::DescriptorType::SAMPLER, 1)]);
        assert!(pool.can_satisfy(&sampler, 1));
    }

    #[test]
    fn test_oversized_request_is_a_configuration_error() {
        let impossible = counts(&[(
            vk::DescriptorType::UNIFORM_BUFFER,
            POOL_TYPE_CAPACITY + 1,
        )]);
        assert!(!fits_fresh_pool(&impossible, 1));
        assert!(!fits_fresh_pool(
            &DescriptorCounts::default(),
            MAX_SETS_PER_POOL + 1
        ));
        assert!(fits_fresh_pool(
            &counts(&[(vk::DescriptorType::UNIFORM_BUFFER, POOL_TYPE_CAPACITY)]),
            MAX_SETS_PER_POOL
        ));
    }
}
