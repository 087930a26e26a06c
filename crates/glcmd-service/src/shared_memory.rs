//! Client-shared memory regions and bucket scratch areas.
//!
//! Commands reference client memory as `(region id, offset, size)`. Every
//! access goes through [`SharedMemoryRegistry`], which resolves the triple with
//! checked arithmetic and copies the bytes in or out. Nothing hands out a
//! reference into client memory: the client may rewrite it concurrently, so a
//! value that is validated and then used must be read exactly once.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use hashbrown::HashMap;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SharedMemoryError {
    #[error("shared memory region {id} is not registered")]
    UnknownRegion { id: u32 },

    #[error("shared memory id 0 is reserved")]
    ReservedId,

    #[error("shared memory region {id} already registered")]
    DuplicateRegion { id: u32 },

    #[error("shared memory access out of bounds: id={id}, offset={offset:#x}, len={len:#x}")]
    OutOfBounds { id: u32, offset: u32, len: usize },

    #[error("failed to allocate {len} bytes for a shared memory copy")]
    AllocationFailed { len: usize },
}

/// One contiguous region of client-visible memory.
pub trait SharedMemory {
    fn size(&self) -> usize;
    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), SharedMemoryError>;
    fn write(&self, offset: usize, src: &[u8]) -> Result<(), SharedMemoryError>;
}

/// Heap-backed region, used by tests and in-process clients.
#[derive(Clone, Debug)]
pub struct VecSharedMemory {
    mem: RefCell<Vec<u8>>,
}

impl VecSharedMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            mem: RefCell::new(vec![0u8; size_bytes]),
        }
    }

    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        Ref::map(self.mem.borrow(), |v| v.as_slice())
    }

    pub fn as_mut_slice(&self) -> RefMut<'_, [u8]> {
        RefMut::map(self.mem.borrow_mut(), |v| v.as_mut_slice())
    }

    fn range(&self, offset: usize, len: usize) -> Option<std::ops::Range<usize>> {
        let end = offset.checked_add(len)?;
        (end <= self.mem.borrow().len()).then_some(offset..end)
    }
}

impl SharedMemory for VecSharedMemory {
    fn size(&self) -> usize {
        self.mem.borrow().len()
    }

    fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), SharedMemoryError> {
        let range = self
            .range(offset, dst.len())
            .ok_or(SharedMemoryError::OutOfBounds {
                id: 0,
                offset: offset as u32,
                len: dst.len(),
            })?;
        dst.copy_from_slice(&self.mem.borrow()[range]);
        Ok(())
    }

    fn write(&self, offset: usize, src: &[u8]) -> Result<(), SharedMemoryError> {
        let range = self
            .range(offset, src.len())
            .ok_or(SharedMemoryError::OutOfBounds {
                id: 0,
                offset: offset as u32,
                len: src.len(),
            })?;
        self.mem.borrow_mut()[range].copy_from_slice(src);
        Ok(())
    }
}

/// Maps opaque region ids to regions and resolves accesses or fails.
#[derive(Default)]
pub struct SharedMemoryRegistry {
    regions: HashMap<u32, Rc<dyn SharedMemory>>,
}

impl std::fmt::Debug for SharedMemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.regions.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("SharedMemoryRegistry")
            .field("regions", &ids)
            .finish()
    }
}

impl SharedMemoryRegistry {
    pub fn register(
        &mut self,
        id: u32,
        region: Rc<dyn SharedMemory>,
    ) -> Result<(), SharedMemoryError> {
        if id == 0 {
            return Err(SharedMemoryError::ReservedId);
        }
        if self.regions.contains_key(&id) {
            return Err(SharedMemoryError::DuplicateRegion { id });
        }
        self.regions.insert(id, region);
        Ok(())
    }

    pub fn unregister(&mut self, id: u32) -> Option<Rc<dyn SharedMemory>> {
        self.regions.remove(&id)
    }

    /// Checks that `len` bytes at `offset` of region `id` exist, without copying.
    pub fn check(&self, id: u32, offset: u32, len: usize) -> Result<(), SharedMemoryError> {
        self.resolve(id, offset, len).map(|_| ())
    }

    fn resolve(
        &self,
        id: u32,
        offset: u32,
        len: usize,
    ) -> Result<(&Rc<dyn SharedMemory>, usize), SharedMemoryError> {
        let region = self
            .regions
            .get(&id)
            .ok_or(SharedMemoryError::UnknownRegion { id })?;
        let start = offset as usize;
        let in_bounds = start
            .checked_add(len)
            .is_some_and(|end| end <= region.size());
        if !in_bounds {
            return Err(SharedMemoryError::OutOfBounds { id, offset, len });
        }
        Ok((region, start))
    }

    /// Copies `len` bytes out of client memory.
    pub fn read(&self, id: u32, offset: u32, len: usize) -> Result<Vec<u8>, SharedMemoryError> {
        let (region, start) = self.resolve(id, offset, len)?;
        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| SharedMemoryError::AllocationFailed { len })?;
        out.resize(len, 0);
        region
            .read(start, &mut out)
            .map_err(|_| SharedMemoryError::OutOfBounds { id, offset, len })?;
        Ok(out)
    }

    pub fn read_u32(&self, id: u32, offset: u32) -> Result<u32, SharedMemoryError> {
        let mut buf = [0u8; 4];
        let (region, start) = self.resolve(id, offset, buf.len())?;
        region
            .read(start, &mut buf)
            .map_err(|_| SharedMemoryError::OutOfBounds { id, offset, len: 4 })?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write(&self, id: u32, offset: u32, src: &[u8]) -> Result<(), SharedMemoryError> {
        let (region, start) = self.resolve(id, offset, src.len())?;
        region
            .write(start, src)
            .map_err(|_| SharedMemoryError::OutOfBounds {
                id,
                offset,
                len: src.len(),
            })
    }

    pub fn write_u32(&self, id: u32, offset: u32, value: u32) -> Result<(), SharedMemoryError> {
        self.write(id, offset, &value.to_le_bytes())
    }

    /// Writes a `{ u32 num_results; T results[] }` block.
    ///
    /// The client must have zeroed `num_results`; any other value means the
    /// block is already in use and the write is rejected with `None`.
    pub fn write_sized_result<T: bytemuck::Pod>(
        &self,
        id: u32,
        offset: u32,
        values: &[T],
    ) -> Result<Option<()>, SharedMemoryError> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        self.check(id, offset, 4 + bytes.len())?;
        if self.read_u32(id, offset)? != 0 {
            return Ok(None);
        }
        let data_offset = offset
            .checked_add(4)
            .ok_or(SharedMemoryError::OutOfBounds {
                id,
                offset,
                len: bytes.len(),
            })?;
        self.write(id, data_offset, bytes)?;
        self.write_u32(id, offset, values.len() as u32)?;
        Ok(Some(()))
    }
}

/// Per-decoder scratch areas used to move variable-sized data (strings,
/// info logs) between client and service in pieces.
#[derive(Debug, Default)]
pub struct Buckets {
    buckets: HashMap<u32, Vec<u8>>,
}

impl Buckets {
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.buckets.get(&id).map(Vec::as_slice)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Vec<u8>> {
        self.buckets.get_mut(&id)
    }

    /// Creates or resizes bucket `id`. New bytes are zero.
    pub fn set_size(&mut self, id: u32, size: usize) -> Result<(), SharedMemoryError> {
        let bucket = self.buckets.entry(id).or_default();
        if size > bucket.len() {
            bucket
                .try_reserve_exact(size - bucket.len())
                .map_err(|_| SharedMemoryError::AllocationFailed { len: size })?;
        }
        bucket.resize(size, 0);
        Ok(())
    }

    pub fn set(&mut self, id: u32, data: Vec<u8>) {
        self.buckets.insert(id, data);
    }

    pub fn remove(&mut self, id: u32) -> bool {
        self.buckets.remove(&id).is_some()
    }

    /// Bucket contents as a string. Trailing NULs are dropped.
    pub fn get_string(&self, id: u32) -> Option<String> {
        let bytes = self.get(id)?;
        let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
        String::from_utf8(bytes[..end].to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(id: u32, size: usize) -> (SharedMemoryRegistry, Rc<VecSharedMemory>) {
        let mem = Rc::new(VecSharedMemory::new(size));
        let mut registry = SharedMemoryRegistry::default();
        registry.register(id, mem.clone()).unwrap();
        (registry, mem)
    }

    #[test]
    fn resolve_rejects_overflowing_ranges() {
        let (registry, _mem) = registry_with(3, 64);
        assert!(registry.read(3, 60, 4).is_ok());
        assert_eq!(
            registry.read(3, 61, 4).unwrap_err(),
            SharedMemoryError::OutOfBounds {
                id: 3,
                offset: 61,
                len: 4
            }
        );
        assert!(matches!(
            registry.read(3, u32::MAX, usize::MAX),
            Err(SharedMemoryError::OutOfBounds { .. })
        ));
        assert_eq!(
            registry.read(4, 0, 1).unwrap_err(),
            SharedMemoryError::UnknownRegion { id: 4 }
        );
    }

    #[test]
    fn id_zero_is_reserved() {
        let mut registry = SharedMemoryRegistry::default();
        let err = registry
            .register(0, Rc::new(VecSharedMemory::new(4)))
            .unwrap_err();
        assert_eq!(err, SharedMemoryError::ReservedId);
    }

    #[test]
    fn reads_are_copies() {
        let (registry, mem) = registry_with(1, 8);
        mem.as_mut_slice()[..4].copy_from_slice(&[1, 2, 3, 4]);
        let copy = registry.read(1, 0, 4).unwrap();
        mem.as_mut_slice()[0] = 9;
        assert_eq!(copy, vec![1, 2, 3, 4]);
    }

    #[test]
    fn sized_result_requires_zeroed_header() {
        let (registry, mem) = registry_with(1, 32);
        assert_eq!(
            registry.write_sized_result(1, 0, &[7i32, -1]).unwrap(),
            Some(())
        );
        assert_eq!(registry.read_u32(1, 0).unwrap(), 2);
        assert_eq!(&mem.as_slice()[4..8], &7i32.to_le_bytes());

        // Header still says 2: the block is considered in use.
        assert_eq!(registry.write_sized_result(1, 0, &[1i32]).unwrap(), None);
    }

    #[test]
    fn bucket_strings_drop_trailing_nuls() {
        let mut buckets = Buckets::default();
        buckets.set(2, b"a_position\0\0".to_vec());
        assert_eq!(buckets.get_string(2).as_deref(), Some("a_position"));
        buckets.set_size(2, 3).unwrap();
        assert_eq!(buckets.get(2), Some(&b"a_p"[..]));
        assert!(buckets.remove(2));
        assert_eq!(buckets.get_string(2), None);
    }
}
