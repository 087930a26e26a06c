use glcmd_protocol::gl;
use hashbrown::HashMap;

/// A buffer object.
///
/// The service keeps a shadow copy of the contents so that index ranges can be
/// scanned and `GL_FIXED` attributes converted without reading back from the
/// driver.
#[derive(Debug, Default)]
pub struct Buffer {
    /// First target the buffer was bound to; array and element data do not mix.
    pub target: Option<u32>,
    pub usage: u32,
    shadow: Vec<u8>,
    max_index_cache: HashMap<(u32, u32, u32), u32>,
}

impl Buffer {
    pub fn size(&self) -> usize {
        self.shadow.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.shadow
    }

    pub fn set_data(&mut self, data: Vec<u8>, usage: u32) {
        self.shadow = data;
        self.usage = usage;
        self.max_index_cache.clear();
    }

    /// Returns `false` when the range does not fit the current size.
    pub fn sub_data(&mut self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        let Some(dst) = self.shadow.get_mut(offset..end) else {
            return false;
        };
        dst.copy_from_slice(data);
        self.max_index_cache.clear();
        true
    }

    /// Largest index in `count` indices of `index_type` starting at byte
    /// `offset`, or `None` when the range does not fit the buffer.
    pub fn max_index(&mut self, index_type: u32, offset: u32, count: u32) -> Option<u32> {
        let key = (index_type, offset, count);
        if let Some(cached) = self.max_index_cache.get(&key) {
            return Some(*cached);
        }
        let size = gl::index_type_size(index_type)?;
        if offset % size != 0 {
            return None;
        }
        let len = count.checked_mul(size)? as usize;
        let start = offset as usize;
        let bytes = self.shadow.get(start..start.checked_add(len)?)?;
        let max = match size {
            1 => bytes.iter().copied().map(u32::from).max(),
            2 => bytes
                .chunks_exact(2)
                .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                .max(),
            _ => bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .max(),
        }
        .unwrap_or(0);
        self.max_index_cache.insert(key, max);
        Some(max)
    }
}
