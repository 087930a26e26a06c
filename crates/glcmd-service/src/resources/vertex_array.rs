use glcmd_protocol::gl;

use super::BufferKey;

/// Client-visible state of one generic vertex attribute array.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttrib {
    pub enabled: bool,
    pub buffer: Option<BufferKey>,
    pub size: u32,
    pub ty: u32,
    pub normalized: bool,
    /// Stride as specified; 0 means tightly packed.
    pub stride: u32,
    pub offset: u32,
}

impl Default for VertexAttrib {
    fn default() -> Self {
        Self {
            enabled: false,
            buffer: None,
            size: 4,
            ty: gl::FLOAT,
            normalized: false,
            stride: 0,
            offset: 0,
        }
    }
}

impl VertexAttrib {
    /// Bytes of one element.
    pub fn element_size(&self) -> u32 {
        gl::attrib_type_size(self.ty).unwrap_or(4) * self.size
    }

    pub fn real_stride(&self) -> u32 {
        if self.stride == 0 {
            self.element_size()
        } else {
            self.stride
        }
    }

    /// Whether `max_vertex` can be read from a buffer of `buffer_size` bytes.
    pub fn can_access(&self, max_vertex: u32, buffer_size: usize) -> bool {
        let end = u64::from(self.offset)
            + u64::from(max_vertex) * u64::from(self.real_stride())
            + u64::from(self.element_size());
        end <= buffer_size as u64
    }
}

#[derive(Debug)]
pub struct VertexArray {
    pub attribs: Vec<VertexAttrib>,
    pub element_buffer: Option<BufferKey>,
}

impl VertexArray {
    pub fn new(max_attribs: u32) -> Self {
        Self {
            attribs: vec![VertexAttrib::default(); max_attribs as usize],
            element_buffer: None,
        }
    }

    pub fn attrib(&self, index: u32) -> Option<&VertexAttrib> {
        self.attribs.get(index as usize)
    }

    pub fn attrib_mut(&mut self, index: u32) -> Option<&mut VertexAttrib> {
        self.attribs.get_mut(index as usize)
    }

    /// Every reference this array holds on `buffer`, counted once per use.
    pub fn buffer_refs(&self, buffer: BufferKey) -> usize {
        self.attribs
            .iter()
            .filter(|a| a.buffer == Some(buffer))
            .count()
            + (self.element_buffer == Some(buffer)) as usize
    }

    /// Unhooks `buffer` everywhere; returns how many references were dropped.
    pub fn detach_buffer(&mut self, buffer: BufferKey) -> usize {
        let dropped = self.buffer_refs(buffer);
        for attrib in &mut self.attribs {
            if attrib.buffer == Some(buffer) {
                attrib.buffer = None;
            }
        }
        if self.element_buffer == Some(buffer) {
            self.element_buffer = None;
        }
        dropped
    }

    /// Every buffer reference held, for releasing on destruction.
    pub fn all_buffer_refs(&self) -> Vec<BufferKey> {
        self.attribs
            .iter()
            .filter_map(|a| a.buffer)
            .chain(self.element_buffer)
            .collect()
    }
}
