//! A recording [`DeviceDriver`] for provider tests.
//!
//! Allocations are real, zeroed host memory so tests can touch them. Every call is
//! recorded as a [`DriverCall`]; failures can be injected per entry point (and per
//! device for residency), and [`MockDriver::verify`] checks call expectations.

use std::{
    alloc::Layout,
    collections::HashMap,
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard},
};

use unimem_level_zero::{
    ContextHandle, DeviceDriver, DeviceHandle, DeviceMemAllocDesc, DeviceProperties,
    DriverResult, DriverStatus, FreePolicy, MemAllocProperties,
};
use unimem_provider::MemoryType;

/// Page size reported for host allocations.
pub const HOST_PAGE_SIZE: usize = 4096;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    DeviceGetProperties {
        device: DeviceHandle,
    },
    MemAllocDevice {
        context: ContextHandle,
        device: DeviceHandle,
        ordinal: u32,
        size: usize,
        alignment: usize,
    },
    MemAllocHost {
        context: ContextHandle,
        size: usize,
        alignment: usize,
    },
    MemAllocShared {
        context: ContextHandle,
        device: DeviceHandle,
        ordinal: u32,
        size: usize,
        alignment: usize,
    },
    MakeMemoryResident {
        context: ContextHandle,
        device: DeviceHandle,
        ptr: usize,
        size: usize,
    },
    MemFree {
        context: ContextHandle,
        ptr: usize,
    },
    MemFreeExt {
        context: ContextHandle,
        policy: FreePolicy,
        ptr: usize,
    },
    MemGetAllocProperties {
        context: ContextHandle,
        ptr: usize,
    },
}

impl DriverCall {
    pub fn is_alloc(&self) -> bool {
        matches!(
            self,
            DriverCall::MemAllocDevice { .. }
                | DriverCall::MemAllocHost { .. }
                | DriverCall::MemAllocShared { .. }
        )
    }

    pub fn is_free(&self) -> bool {
        matches!(self, DriverCall::MemFree { .. } | DriverCall::MemFreeExt { .. })
    }

    pub fn is_residency(&self) -> bool {
        matches!(self, DriverCall::MakeMemoryResident { .. })
    }
}

/// Expected (or observed) number of calls per kind of entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub device_properties: usize,
    pub alloc: usize,
    pub residency: usize,
    pub free: usize,
    pub alloc_properties: usize,
}

struct Allocation {
    layout: Layout,
    memory_type: MemoryType,
    page_size: usize,
    id: u64,
}

#[derive(Default)]
struct MockState {
    calls: Vec<DriverCall>,
    devices: HashMap<DeviceHandle, DeviceProperties>,
    live: HashMap<usize, Allocation>,
    next_id: u64,
    fail_device_properties: Option<DriverStatus>,
    fail_alloc: Option<DriverStatus>,
    fail_residency: HashMap<DeviceHandle, DriverStatus>,
    fail_alloc_properties: Option<DriverStatus>,
    fail_free: Option<DriverStatus>,
    reported_memory_type: Option<MemoryType>,
}

/// See the module documentation.
pub struct MockDriver {
    default_properties: DeviceProperties,
    state: Mutex<MockState>,
}

impl MockDriver {
    /// A driver whose devices report a 1024-byte minimum page size.
    pub fn new() -> Arc<MockDriver> {
        MockDriver::with_min_page_size(1024)
    }

    pub fn with_min_page_size(min_page_size: usize) -> Arc<MockDriver> {
        Arc::new(MockDriver {
            default_properties: DeviceProperties {
                name: "TESTGPU".to_string(),
                min_page_size,
                max_mem_alloc_size: 1 << 32,
            },
            state: Mutex::new(MockState {
                next_id: 1,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Overrides the properties reported for `device`.
    pub fn set_device_properties(&self, device: DeviceHandle, properties: DeviceProperties) {
        self.state().devices.insert(device, properties);
    }

    pub fn fail_device_properties(&self, status: DriverStatus) {
        self.state().fail_device_properties = Some(status);
    }

    /// Makes the next allocation calls fail with `status`.
    pub fn fail_alloc(&self, status: DriverStatus) {
        self.state().fail_alloc = Some(status);
    }

    /// Makes residency requests for `device` fail with `status`.
    pub fn fail_residency_on(&self, device: DeviceHandle, status: DriverStatus) {
        self.state().fail_residency.insert(device, status);
    }

    pub fn fail_alloc_properties(&self, status: DriverStatus) {
        self.state().fail_alloc_properties = Some(status);
    }

    /// Free calls still release the memory but report `status`.
    pub fn fail_free(&self, status: DriverStatus) {
        self.state().fail_free = Some(status);
    }

    /// Reports `memory_type` for every allocation instead of its actual type.
    pub fn report_memory_type(&self, memory_type: MemoryType) {
        self.state().reported_memory_type = Some(memory_type);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_device_properties = None;
        state.fail_alloc = None;
        state.fail_residency.clear();
        state.fail_alloc_properties = None;
        state.fail_free = None;
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn counts(&self) -> CallCounts {
        let state = self.state();
        let mut counts = CallCounts::default();
        for call in &state.calls {
            match call {
                DriverCall::DeviceGetProperties { .. } => counts.device_properties += 1,
                DriverCall::MakeMemoryResident { .. } => counts.residency += 1,
                DriverCall::MemGetAllocProperties { .. } => counts.alloc_properties += 1,
                c if c.is_alloc() => counts.alloc += 1,
                c if c.is_free() => counts.free += 1,
                _ => unreachable!(),
            }
        }
        counts
    }

    /// Devices `ptr` was made resident on, in call order.
    pub fn resident_devices_of(&self, ptr: NonNull<u8>) -> Vec<DeviceHandle> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                DriverCall::MakeMemoryResident { device, ptr: p, .. }
                    if *p == ptr.as_ptr() as usize =>
                {
                    Some(*device)
                }
                _ => None,
            })
            .collect()
    }

    /// Number of allocations not freed yet.
    pub fn live_allocations(&self) -> usize {
        self.state().live.len()
    }

    /// Checks the recorded calls against `expected`.
    pub fn verify(&self, expected: CallCounts) -> anyhow::Result<()> {
        let actual = self.counts();
        if actual != expected {
            anyhow::bail!(
                "driver call mismatch:\n  expected {expected:?}\n  actual   {actual:?}\n  calls    {:#?}",
                self.calls()
            );
        }
        Ok(())
    }

    fn allocate(
        &self,
        call: DriverCall,
        size: usize,
        alignment: usize,
        memory_type: MemoryType,
        page_size: usize,
    ) -> DriverResult<NonNull<u8>> {
        let mut state = self.state();
        state.calls.push(call);
        if let Some(status) = state.fail_alloc {
            return Err(status);
        }
        if size == 0 {
            return Err(DriverStatus::UnsupportedSize);
        }
        let layout = Layout::from_size_align(size, alignment.max(16))
            .map_err(|_| DriverStatus::UnsupportedAlignment)?;
        let ptr = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
            .ok_or(DriverStatus::OutOfHostMemory)?;
        let id = state.next_id;
        state.next_id += 1;
        state.live.insert(
            ptr.as_ptr() as usize,
            Allocation {
                layout,
                memory_type,
                page_size,
                id,
            },
        );
        Ok(ptr)
    }

    fn release(&self, call: DriverCall, ptr: NonNull<u8>) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.push(call);
        let allocation = state
            .live
            .remove(&(ptr.as_ptr() as usize))
            .ok_or(DriverStatus::InvalidArgument)?;
        unsafe { std::alloc::dealloc(ptr.as_ptr(), allocation.layout) };
        match state.fail_free {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn page_size_of(&self, device: DeviceHandle) -> usize {
        self.state()
            .devices
            .get(&device)
            .map_or(self.default_properties.min_page_size, |p| p.min_page_size)
    }
}

impl DeviceDriver for MockDriver {
    fn device_get_properties(&self, device: DeviceHandle) -> DriverResult<DeviceProperties> {
        let mut state = self.state();
        state.calls.push(DriverCall::DeviceGetProperties { device });
        if let Some(status) = state.fail_device_properties {
            return Err(status);
        }
        if device.is_null() {
            return Err(DriverStatus::InvalidNullHandle);
        }
        Ok(state
            .devices
            .get(&device)
            .cloned()
            .unwrap_or_else(|| self.default_properties.clone()))
    }

    fn mem_alloc_device(
        &self,
        context: ContextHandle,
        desc: &DeviceMemAllocDesc,
        size: usize,
        alignment: usize,
        device: DeviceHandle,
    ) -> DriverResult<NonNull<u8>> {
        let call = DriverCall::MemAllocDevice {
            context,
            device,
            ordinal: desc.ordinal,
            size,
            alignment,
        };
        let page_size = self.page_size_of(device);
        self.allocate(call, size, alignment, MemoryType::Device, page_size)
    }

    fn mem_alloc_host(
        &self,
        context: ContextHandle,
        size: usize,
        alignment: usize,
    ) -> DriverResult<NonNull<u8>> {
        let call = DriverCall::MemAllocHost {
            context,
            size,
            alignment,
        };
        self.allocate(call, size, alignment, MemoryType::Host, HOST_PAGE_SIZE)
    }

    fn mem_alloc_shared(
        &self,
        context: ContextHandle,
        desc: &DeviceMemAllocDesc,
        size: usize,
        alignment: usize,
        device: DeviceHandle,
    ) -> DriverResult<NonNull<u8>> {
        let call = DriverCall::MemAllocShared {
            context,
            device,
            ordinal: desc.ordinal,
            size,
            alignment,
        };
        let page_size = self.page_size_of(device);
        self.allocate(call, size, alignment, MemoryType::Shared, page_size)
    }

    fn context_make_memory_resident(
        &self,
        context: ContextHandle,
        device: DeviceHandle,
        ptr: NonNull<u8>,
        size: usize,
    ) -> DriverResult<()> {
        let mut state = self.state();
        state.calls.push(DriverCall::MakeMemoryResident {
            context,
            device,
            ptr: ptr.as_ptr() as usize,
            size,
        });
        match state.fail_residency.get(&device) {
            Some(&status) => Err(status),
            None => Ok(()),
        }
    }

    fn mem_free(&self, context: ContextHandle, ptr: NonNull<u8>) -> DriverResult<()> {
        let call = DriverCall::MemFree {
            context,
            ptr: ptr.as_ptr() as usize,
        };
        self.release(call, ptr)
    }

    fn mem_free_ext(
        &self,
        context: ContextHandle,
        policy: FreePolicy,
        ptr: NonNull<u8>,
    ) -> DriverResult<()> {
        let call = DriverCall::MemFreeExt {
            context,
            policy,
            ptr: ptr.as_ptr() as usize,
        };
        self.release(call, ptr)
    }

    fn mem_get_alloc_properties(
        &self,
        context: ContextHandle,
        ptr: NonNull<u8>,
    ) -> DriverResult<MemAllocProperties> {
        let mut state = self.state();
        state.calls.push(DriverCall::MemGetAllocProperties {
            context,
            ptr: ptr.as_ptr() as usize,
        });
        if let Some(status) = state.fail_alloc_properties {
            return Err(status);
        }
        let addr = ptr.as_ptr() as usize;
        let props = state
            .live
            .iter()
            .find(|&(&base, a)| addr >= base && addr < base + a.layout.size())
            .map(|(_, a)| MemAllocProperties {
                memory_type: a.memory_type,
                id: a.id,
                page_size: a.page_size,
            })
            .unwrap_or(MemAllocProperties {
                memory_type: MemoryType::Unknown,
                id: 0,
                page_size: 0,
            });
        Ok(MemAllocProperties {
            memory_type: state.reported_memory_type.unwrap_or(props.memory_type),
            ..props
        })
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        for (addr, allocation) in state.live.drain() {
            unsafe { std::alloc::dealloc(addr as *mut u8, allocation.layout) };
        }
    }
}
