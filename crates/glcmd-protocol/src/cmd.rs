//! Command buffer layouts.
//!
//! A command buffer is a sequence of 32-bit little-endian *entries*. Every
//! command starts with a one-entry [`CmdHeader`] followed by its fixed
//! arguments (one entry each) and, for `AtLeastN` commands, trailing
//! *immediate* data padded to a whole number of entries.

use core::fmt;

/// Bytes per command buffer entry.
pub const ENTRY_SIZE_BYTES: usize = 4;

/// Largest representable command size, in entries (21-bit field).
pub const MAX_COMMAND_SIZE_ENTRIES: u32 = (1 << 21) - 1;

/// Largest representable command id (11-bit field).
pub const MAX_COMMAND_ID: u32 = (1 << 11) - 1;

/// Ids below this value are common (non-GL) commands.
pub const FIRST_GL_COMMAND: u32 = 0x100;

/// Number of id slots reserved for GL commands, starting at [`FIRST_GL_COMMAND`].
pub const GL_COMMAND_SLOTS: u32 = 0x5A;

/// Number of common command slots that have a command assigned.
pub const COMMON_COMMAND_COUNT: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CmdHeader {
    /// Total command size in entries, header included.
    pub size: u32,
    pub command: u32,
}

impl CmdHeader {
    pub const SIZE_ENTRIES: u32 = 1;

    pub const fn from_entry(entry: u32) -> Self {
        Self {
            size: entry & MAX_COMMAND_SIZE_ENTRIES,
            command: entry >> 21,
        }
    }

    pub const fn to_entry(self) -> u32 {
        (self.size & MAX_COMMAND_SIZE_ENTRIES) | (self.command << 21)
    }
}

/// Argument-count policy of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgFlags {
    /// The command is exactly `1 + ARG_COUNT` entries long.
    Fixed,
    /// The command is at least `1 + ARG_COUNT` entries long; the rest is immediate data.
    AtLeastN,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdDecodeError {
    TooFewArgs { expected: u32, found: usize },
    SizeNotEntryAligned { len: usize },
    CommandTooLarge { entries: usize },
}

impl fmt::Display for CmdDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmdDecodeError::TooFewArgs { expected, found } => {
                write!(f, "command expects {expected} argument entries, found {found}")
            }
            CmdDecodeError::SizeNotEntryAligned { len } => {
                write!(f, "byte length {len} is not a multiple of the entry size")
            }
            CmdDecodeError::CommandTooLarge { entries } => {
                write!(f, "command of {entries} entries does not fit the header size field")
            }
        }
    }
}

impl std::error::Error for CmdDecodeError {}

/// A value that occupies exactly one entry.
pub trait CmdArg: Copy {
    fn from_entry(entry: u32) -> Self;
    fn to_entry(self) -> u32;
}

impl CmdArg for u32 {
    fn from_entry(entry: u32) -> Self {
        entry
    }
    fn to_entry(self) -> u32 {
        self
    }
}

impl CmdArg for i32 {
    fn from_entry(entry: u32) -> Self {
        entry as i32
    }
    fn to_entry(self) -> u32 {
        self as u32
    }
}

impl CmdArg for f32 {
    fn from_entry(entry: u32) -> Self {
        f32::from_bits(entry)
    }
    fn to_entry(self) -> u32 {
        self.to_bits()
    }
}

impl CmdArg for bool {
    fn from_entry(entry: u32) -> Self {
        entry != 0
    }
    fn to_entry(self) -> u32 {
        self as u32
    }
}

/// A command with a fixed argument layout.
pub trait Command: Sized + Copy + fmt::Debug {
    const ID: u32;
    const NAME: &'static str;
    const ARG_FLAGS: ArgFlags;
    /// Fixed argument entries following the header.
    const ARG_COUNT: u32;

    /// Copies the fixed arguments out of `args` (which excludes the header).
    fn decode(args: &[u32]) -> Result<Self, CmdDecodeError>;

    /// Appends the fixed arguments (no header) to `out`.
    fn encode(&self, out: &mut Vec<u32>);
}

macro_rules! commands {
    (@count) => { 0u32 };
    (@count $head:ident $($tail:ident)*) => { 1u32 + commands!(@count $($tail)*) };
    ($(
        $(#[$meta:meta])*
        $id:literal => $name:ident [$flags:ident] { $($field:ident : $ty:ty),* $(,)? }
    )*) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, Debug, Default, PartialEq)]
            pub struct $name {
                $(pub $field: $ty,)*
            }

            impl Command for $name {
                const ID: u32 = $id;
                const NAME: &'static str = stringify!($name);
                const ARG_FLAGS: ArgFlags = ArgFlags::$flags;
                const ARG_COUNT: u32 = commands!(@count $($field)*);

                #[allow(unused_mut, unused_variables)]
                fn decode(args: &[u32]) -> Result<Self, CmdDecodeError> {
                    if args.len() < Self::ARG_COUNT as usize {
                        return Err(CmdDecodeError::TooFewArgs {
                            expected: Self::ARG_COUNT,
                            found: args.len(),
                        });
                    }
                    let mut it = args.iter().copied();
                    Ok(Self {
                        $($field: <$ty as CmdArg>::from_entry(it.next().unwrap_or(0)),)*
                    })
                }

                #[allow(unused_variables)]
                fn encode(&self, out: &mut Vec<u32>) {
                    $(out.push(CmdArg::to_entry(self.$field));)*
                }
            }
        )*

        /// Every command id known to this protocol revision, with its name.
        pub const ALL_COMMANDS: &[(u32, &str)] = &[$(($id, stringify!($name))),*];
    };
}

commands! {
    /* ----------------------------- Common commands ---------------------------- */

    0x000 => Noop [AtLeastN] {}
    0x001 => SetToken [Fixed] { token: u32 }
    0x002 => SetBucketSize [Fixed] { bucket_id: u32, size: u32 }
    0x003 => SetBucketData [Fixed] {
        bucket_id: u32, offset: u32, size: u32, shm_id: u32, shm_offset: u32,
    }
    0x004 => SetBucketDataImmediate [AtLeastN] { bucket_id: u32, offset: u32, size: u32 }
    /// Writes the bucket size to `result_shm` and as much data as fits into `data_shm`.
    0x005 => GetBucketStart [Fixed] {
        bucket_id: u32, result_shm_id: u32, result_shm_offset: u32,
        data_memory_size: u32, data_shm_id: u32, data_shm_offset: u32,
    }
    0x006 => GetBucketData [Fixed] {
        bucket_id: u32, offset: u32, size: u32, shm_id: u32, shm_offset: u32,
    }
    0x007 => DeleteBucket [Fixed] { bucket_id: u32 }

    /* ------------------------------- GL commands ------------------------------ */

    0x100 => ActiveTexture [Fixed] { texture: u32 }
    0x101 => AttachShader [Fixed] { program: u32, shader: u32 }
    0x102 => BindAttribLocationBucket [Fixed] { program: u32, index: u32, name_bucket_id: u32 }
    0x103 => BindBuffer [Fixed] { target: u32, buffer: u32 }
    0x104 => BindFramebuffer [Fixed] { target: u32, framebuffer: u32 }
    0x105 => BindRenderbuffer [Fixed] { target: u32, renderbuffer: u32 }
    0x106 => BindTexture [Fixed] { target: u32, texture: u32 }
    /// `data_shm_id == 0` allocates uninitialised (zeroed) storage.
    0x107 => BufferData [Fixed] {
        target: u32, size: u32, data_shm_id: u32, data_shm_offset: u32, usage: u32,
    }
    0x108 => BufferSubData [Fixed] {
        target: u32, offset: u32, size: u32, data_shm_id: u32, data_shm_offset: u32,
    }
    0x109 => CheckFramebufferStatus [Fixed] {
        target: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x10A => Clear [Fixed] { mask: u32 }
    0x10B => ClearColor [Fixed] { red: f32, green: f32, blue: f32, alpha: f32 }
    0x10C => ClearDepthf [Fixed] { depth: f32 }
    0x10D => ClearStencil [Fixed] { s: i32 }
    0x10E => ColorMask [Fixed] { red: bool, green: bool, blue: bool, alpha: bool }
    0x10F => CompileShader [Fixed] { shader: u32 }
    0x110 => CreateProgram [Fixed] { client_id: u32 }
    0x111 => CreateShader [Fixed] { shader_type: u32, client_id: u32 }
    0x113 => DeleteBuffersImmediate [AtLeastN] { n: u32 }
    0x114 => DeleteFramebuffersImmediate [AtLeastN] { n: u32 }
    0x115 => DeleteProgram [Fixed] { program: u32 }
    0x116 => DeleteRenderbuffersImmediate [AtLeastN] { n: u32 }
    0x117 => DeleteShader [Fixed] { shader: u32 }
    0x118 => DeleteTexturesImmediate [AtLeastN] { n: u32 }
    0x119 => DepthMask [Fixed] { flag: bool }
    0x11A => DetachShader [Fixed] { program: u32, shader: u32 }
    0x11B => Disable [Fixed] { cap: u32 }
    0x11C => DisableVertexAttribArray [Fixed] { index: u32 }
    0x11D => DrawArrays [Fixed] { mode: u32, first: i32, count: i32 }
    0x11E => DrawElements [Fixed] { mode: u32, count: i32, index_type: u32, index_offset: u32 }
    0x11F => Enable [Fixed] { cap: u32 }
    0x120 => EnableVertexAttribArray [Fixed] { index: u32 }
    0x121 => Finish [Fixed] {}
    0x122 => Flush [Fixed] {}
    0x123 => FramebufferRenderbuffer [Fixed] {
        target: u32, attachment: u32, renderbuffer_target: u32, renderbuffer: u32,
    }
    0x124 => FramebufferTexture2D [Fixed] {
        target: u32, attachment: u32, textarget: u32, texture: u32, level: i32,
    }
    0x125 => GenBuffersImmediate [AtLeastN] { n: u32 }
    0x126 => GenFramebuffersImmediate [AtLeastN] { n: u32 }
    0x127 => GenRenderbuffersImmediate [AtLeastN] { n: u32 }
    0x128 => GenTexturesImmediate [AtLeastN] { n: u32 }
    0x129 => GetError [Fixed] { result_shm_id: u32, result_shm_offset: u32 }
    0x12A => GetProgramiv [Fixed] {
        program: u32, pname: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x12B => GetShaderiv [Fixed] {
        shader: u32, pname: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x12C => GetShaderInfoLog [Fixed] { shader: u32, bucket_id: u32 }
    0x12D => GetProgramInfoLog [Fixed] { program: u32, bucket_id: u32 }
    0x12E => GetAttribLocation [Fixed] {
        program: u32, name_bucket_id: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x12F => GetUniformLocation [Fixed] {
        program: u32, name_bucket_id: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x130 => GetVertexAttribfv [Fixed] {
        index: u32, pname: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x131 => GetVertexAttribiv [Fixed] {
        index: u32, pname: u32, result_shm_id: u32, result_shm_offset: u32,
    }
    0x132 => LinkProgram [Fixed] { program: u32 }
    0x133 => PixelStorei [Fixed] { pname: u32, param: i32 }
    0x134 => ReadPixels [Fixed] {
        x: i32, y: i32, width: i32, height: i32, format: u32, pixel_type: u32,
        pixels_shm_id: u32, pixels_shm_offset: u32,
        result_shm_id: u32, result_shm_offset: u32, is_async: bool,
    }
    0x135 => RenderbufferStorage [Fixed] {
        target: u32, internal_format: u32, width: i32, height: i32,
    }
    0x136 => RenderbufferStorageMultisample [Fixed] {
        target: u32, samples: i32, internal_format: u32, width: i32, height: i32,
    }
    0x137 => Scissor [Fixed] { x: i32, y: i32, width: i32, height: i32 }
    0x138 => ShaderSourceBucket [Fixed] { shader: u32, str_bucket_id: u32 }
    0x139 => StencilMask [Fixed] { mask: u32 }
    /// `pixels_shm_id == 0` defines the level without initialising it.
    0x13A => TexImage2D [Fixed] {
        target: u32, level: i32, internal_format: u32, width: i32, height: i32,
        format: u32, pixel_type: u32, pixels_shm_id: u32, pixels_shm_offset: u32,
    }
    0x13B => TexParameteri [Fixed] { target: u32, pname: u32, param: i32 }
    0x13C => TexStorage2D [Fixed] {
        target: u32, levels: i32, internal_format: u32, width: i32, height: i32,
    }
    0x13D => TexSubImage2D [Fixed] {
        target: u32, level: i32, xoffset: i32, yoffset: i32, width: i32, height: i32,
        format: u32, pixel_type: u32, pixels_shm_id: u32, pixels_shm_offset: u32,
    }
    0x13E => Uniform1i [Fixed] { location: i32, x: i32 }
    0x13F => Uniform4f [Fixed] { location: i32, x: f32, y: f32, z: f32, w: f32 }
    0x141 => UseProgram [Fixed] { program: u32 }
    0x142 => VertexAttrib4f [Fixed] { index: u32, x: f32, y: f32, z: f32, w: f32 }
    0x143 => VertexAttribPointer [Fixed] {
        index: u32, size: i32, attrib_type: u32, normalized: bool, stride: i32, offset: u32,
    }
    0x144 => Viewport [Fixed] { x: i32, y: i32, width: i32, height: i32 }
    0x145 => GenQueriesImmediate [AtLeastN] { n: u32 }
    0x146 => DeleteQueriesImmediate [AtLeastN] { n: u32 }
    0x147 => BeginQuery [Fixed] { target: u32, id: u32, sync_shm_id: u32, sync_shm_offset: u32 }
    0x148 => EndQuery [Fixed] { target: u32, submit_count: u32 }
    0x149 => GenVertexArraysImmediate [AtLeastN] { n: u32 }
    0x14A => DeleteVertexArraysImmediate [AtLeastN] { n: u32 }
    0x14B => BindVertexArray [Fixed] { array: u32 }
    0x14C => AsyncTexImage2D [Fixed] {
        target: u32, level: i32, internal_format: u32, width: i32, height: i32,
        format: u32, pixel_type: u32, pixels_shm_id: u32, pixels_shm_offset: u32,
        async_upload_token: u32, sync_shm_id: u32, sync_shm_offset: u32,
    }
    0x14D => AsyncTexSubImage2D [Fixed] {
        target: u32, level: i32, xoffset: i32, yoffset: i32, width: i32, height: i32,
        format: u32, pixel_type: u32, pixels_shm_id: u32, pixels_shm_offset: u32,
        async_upload_token: u32, sync_shm_id: u32, sync_shm_offset: u32,
    }
    0x14E => WaitAsyncTexImage2D [Fixed] { target: u32 }
    0x14F => WaitAllAsyncTexImage2D [Fixed] {}
    0x150 => BindTexImage2D [Fixed] { target: u32, image_id: u32 }
    0x151 => ReleaseTexImage2D [Fixed] { target: u32, image_id: u32 }
    0x152 => GenValuebuffersImmediate [AtLeastN] { n: u32 }
    0x153 => DeleteValuebuffersImmediate [AtLeastN] { n: u32 }
    0x154 => BindValuebuffer [Fixed] { target: u32, valuebuffer: u32 }
    0x155 => SubscribeValue [Fixed] { target: u32, subscription: u32 }
    0x156 => PopulateSubscribedValues [Fixed] { target: u32 }
    0x157 => UniformValuebuffer [Fixed] { location: i32, target: u32, subscription: u32 }
    /// Defers the rest of the stream until `sync_point` has been released.
    0x158 => WaitSyncPoint [Fixed] { sync_point: u32 }
    0x159 => LoseContext [Fixed] { current: u32, other: u32 }
}

/// Returns the name of a known command id.
pub fn command_name(id: u32) -> Option<&'static str> {
    ALL_COMMANDS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}

/// Number of entries needed to hold `len` bytes.
pub const fn entries_for_bytes(len: usize) -> usize {
    len.div_ceil(ENTRY_SIZE_BYTES)
}

/// Reinterprets a little-endian byte stream as entries.
pub fn entries_from_le_bytes(bytes: &[u8]) -> Result<Vec<u32>, CmdDecodeError> {
    if bytes.len() % ENTRY_SIZE_BYTES != 0 {
        return Err(CmdDecodeError::SizeNotEntryAligned { len: bytes.len() });
    }
    Ok(bytes
        .chunks_exact(ENTRY_SIZE_BYTES)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Serialises entries as little-endian bytes.
pub fn entries_to_le_bytes(entries: &[u32]) -> Vec<u8> {
    entries.iter().flat_map(|e| e.to_le_bytes()).collect()
}

/// Copies `len` bytes of immediate data out of `entries`.
///
/// Returns `None` when `len` exceeds the data available.
pub fn immediate_bytes(entries: &[u32], len: usize) -> Option<Vec<u8>> {
    if len > entries.len().checked_mul(ENTRY_SIZE_BYTES)? {
        return None;
    }
    let mut out = entries_to_le_bytes(&entries[..entries_for_bytes(len)]);
    out.truncate(len);
    Some(out)
}

/* ------------------------ Client-visible result layouts ------------------------ */

/// `{ u32 num_results; T results[] }` as written by `Get*iv`-style commands.
///
/// The client must zero `num_results` before issuing the command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizedResultHeader {
    pub num_results: u32,
}

impl SizedResultHeader {
    pub const SIZE_BYTES: usize = 4;
}

/// Written by the service when a query result becomes available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuerySync {
    /// The `submit_count` of the `EndQuery` whose result is in `result`.
    pub process_count: u32,
    pub reserved0: u32,
    pub result: u64,
}

impl QuerySync {
    pub const SIZE_BYTES: usize = 16;

    pub fn to_le_bytes(self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.process_count.to_le_bytes());
        out[4..8].copy_from_slice(&self.reserved0.to_le_bytes());
        out[8..16].copy_from_slice(&self.result.to_le_bytes());
        out
    }

    pub fn from_le_bytes(buf: &[u8; Self::SIZE_BYTES]) -> Self {
        Self {
            process_count: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            reserved0: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            result: u64::from_le_bytes([
                buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
            ]),
        }
    }
}

/// Written by the service when an asynchronous upload completes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsyncUploadSync {
    pub async_upload_token: u32,
    pub reserved0: u32,
}

impl AsyncUploadSync {
    pub const SIZE_BYTES: usize = 8;

    pub fn to_le_bytes(self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.async_upload_token.to_le_bytes());
        out[4..8].copy_from_slice(&self.reserved0.to_le_bytes());
        out
    }

    pub fn from_le_bytes(buf: &[u8; Self::SIZE_BYTES]) -> Self {
        Self {
            async_upload_token: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            reserved0: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Written by `ReadPixels` once the pixels are in client memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadPixelsResult {
    pub success: u32,
    pub row_length: u32,
    pub num_rows: u32,
}

impl ReadPixelsResult {
    pub const SIZE_BYTES: usize = 12;

    pub fn to_le_bytes(self) -> [u8; Self::SIZE_BYTES] {
        let mut out = [0u8; Self::SIZE_BYTES];
        out[0..4].copy_from_slice(&self.success.to_le_bytes());
        out[4..8].copy_from_slice(&self.row_length.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_rows.to_le_bytes());
        out
    }

    pub fn from_le_bytes(buf: &[u8; Self::SIZE_BYTES]) -> Self {
        Self {
            success: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            row_length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            num_rows: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_packs_size_and_command() {
        let hdr = CmdHeader {
            size: 3,
            command: DrawArrays::ID,
        };
        let entry = hdr.to_entry();
        assert_eq!(entry & 0x1F_FFFF, 3);
        assert_eq!(CmdHeader::from_entry(entry), hdr);
    }

    #[test]
    fn arg_counts_follow_field_lists() {
        assert_eq!(Noop::ARG_COUNT, 0);
        assert_eq!(Finish::ARG_COUNT, 0);
        assert_eq!(DrawArrays::ARG_COUNT, 3);
        assert_eq!(ReadPixels::ARG_COUNT, 11);
        assert_eq!(AsyncTexSubImage2D::ARG_COUNT, 13);
        assert_eq!(GenBuffersImmediate::ARG_FLAGS, ArgFlags::AtLeastN);
    }

    #[test]
    fn decode_copies_typed_fields() {
        let mut args = Vec::new();
        ClearColor {
            red: 0.25,
            green: 0.5,
            blue: 0.75,
            alpha: 1.0,
        }
        .encode(&mut args);
        let decoded = ClearColor::decode(&args).unwrap();
        assert_eq!(decoded.green, 0.5);

        let draw = DrawArrays::decode(&[gl_triangles(), (-1i32) as u32, 6]).unwrap();
        assert_eq!(draw.first, -1);
        assert_eq!(draw.count, 6);
    }

    fn gl_triangles() -> u32 {
        crate::gl::TRIANGLES
    }

    #[test]
    fn decode_rejects_short_argument_lists() {
        let err = TexImage2D::decode(&[0; 4]).unwrap_err();
        assert_eq!(
            err,
            CmdDecodeError::TooFewArgs {
                expected: 9,
                found: 4
            }
        );
    }

    #[test]
    fn command_ids_are_unique_and_in_range() {
        let mut seen = std::collections::HashSet::new();
        for (id, name) in ALL_COMMANDS {
            assert!(seen.insert(*id), "duplicate id for {name}");
            assert!(*id <= MAX_COMMAND_ID);
            if *id >= FIRST_GL_COMMAND {
                assert!(*id < FIRST_GL_COMMAND + GL_COMMAND_SLOTS, "{name} outside GL range");
            }
        }
        let common = ALL_COMMANDS
            .iter()
            .filter(|(id, _)| *id < FIRST_GL_COMMAND)
            .count();
        assert_eq!(common as u32, COMMON_COMMAND_COUNT);
    }

    #[test]
    fn immediate_bytes_truncates_padding() {
        let entries = [u32::from_le_bytes(*b"abcd"), u32::from_le_bytes(*b"ef\0\0")];
        assert_eq!(immediate_bytes(&entries, 6).unwrap(), b"abcdef");
        assert!(immediate_bytes(&entries, 9).is_none());
    }

    #[test]
    fn entries_from_le_bytes_requires_alignment() {
        assert_eq!(
            entries_from_le_bytes(&[1, 2, 3]).unwrap_err(),
            CmdDecodeError::SizeNotEntryAligned { len: 3 }
        );
        assert_eq!(entries_from_le_bytes(&[1, 0, 0, 0]).unwrap(), vec![1]);
    }
}
