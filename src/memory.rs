use crate::error::{HostError, HostResult};

// NB. offsets are u32 as per the wasm32 address space; lengths are usize to stop endless casting

/// size of one linear-memory page
pub const PAGE_SIZE_BYTES: usize = 0x1_0000;

/// the shared region is fixed at two pages; it never grows
pub const SHARED_PAGES: u32 = 2;

/// total size of the shared region
pub const SHARED_SIZE_BYTES: usize = SHARED_PAGES as usize * PAGE_SIZE_BYTES;

/// the guest's 4K machine image; reserved out of the shared region
pub const SYSTEM_RESERVED_BYTES: usize = 0x1000;

/// the most a program can be
pub const PROGRAM_CAPACITY_BYTES: usize = SHARED_SIZE_BYTES - SYSTEM_RESERVED_BYTES;

/// where programs are copied to before the guest is told about them
pub const PROGRAM_LOAD_OFFSET: u32 = 0;

/// A named window into the guest's machine image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub offset: u32,
    pub len: usize,
}

impl Field {
    const fn new(offset: u32, len: usize) -> Self {
        Field { offset, len }
    }
}

/// Defines the guest's 4K memory map, relative to the base it reports:
///   0x0050-0x0051  program counter (big-endian)
///   0x0052-0x0053  stack pointer
///   0x0054-0x0055  index register
///   0x0ea0-0x0ecf  call stack, 24 words
///   0x0ef0-0x0eff  V0-VF
///   0x0f00-0x0fff  display, 64x32 bits row-major
///
/// the guest writes these; the host only ever reads them
pub const PROGRAM_COUNTER: Field = Field::new(0x50, 2);
pub const STACK_POINTER: Field = Field::new(0x52, 2);
pub const INDEX_REGISTER: Field = Field::new(0x54, 2);
pub const CALL_STACK: Field = Field::new(0xea0, 0x30);
pub const REGISTERS: Field = Field::new(0xef0, 0x10);
pub const DISPLAY: Field = Field::new(0xf00, 0x100);

pub const CALL_STACK_WORDS: usize = CALL_STACK.len / 2;
pub const REGISTER_COUNT: usize = REGISTERS.len;
pub const DISPLAY_SIZE_BYTES: usize = DISPLAY.len;

/// Bounds-checked access to a byte arena. Offsets come from the guest, so
/// nothing here is allowed to panic.
pub trait MemoryMap {
    /// get a r/o slice of the underlying memory
    fn get_ro_slice(&self, addr: u32, len: usize) -> Option<&[u8]>;

    /// get a r/w slice of the underlying memory
    fn get_rw_slice(&mut self, addr: u32, len: usize) -> Option<&mut [u8]>;

    /// write a chunk of bytes; all or nothing
    fn write(&mut self, data: &[u8], addr: u32) -> Option<()> {
        self.get_rw_slice(addr, data.len())?.copy_from_slice(data);
        Some(())
    }

    /// get a two-byte big-endian word
    fn get_word(&self, addr: u32) -> Option<u16> {
        let word = self.get_ro_slice(addr, 2)?;
        Some(((word[0] as u16) << 8) + (word[1] as u16))
    }
}

impl MemoryMap for [u8] {
    fn get_ro_slice(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let a = addr as usize;
        self.get(a..a.checked_add(len)?)
    }

    fn get_rw_slice(&mut self, addr: u32, len: usize) -> Option<&mut [u8]> {
        let a = addr as usize;
        self.get_mut(a..a.checked_add(len)?)
    }
}

/// The host-allocated arena in-process guests run against. Wasm guests get
/// the equivalent from the engine; either way all fields are views of one
/// buffer.
pub struct SharedMemory {
    bytes: Box<[u8]>,
}

impl SharedMemory {
    pub fn new() -> Self {
        SharedMemory {
            bytes: vec![0u8; SHARED_SIZE_BYTES].into_boxed_slice(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// The guest's machine image as located at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    base: u32,
}

impl Layout {
    /// check the reported base against the arena; any mismatch corrupts every
    /// later read so it is fatal
    pub fn new(base: u32, memory_len: usize) -> HostResult<Self> {
        let fits = (base as usize)
            .checked_add(SYSTEM_RESERVED_BYTES)
            .map_or(false, |end| end <= memory_len);
        if memory_len != SHARED_SIZE_BYTES || !fits {
            return Err(HostError::LayoutMismatch { base, memory_len });
        }
        Ok(Layout { base })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// absolute address of a field
    pub fn addr(&self, field: Field) -> u32 {
        self.base + field.offset
    }

    /// does [start, start + len) touch the machine image?
    pub fn overlaps(&self, start: u32, len: usize) -> bool {
        let start = start as usize;
        let base = self.base as usize;
        len > 0 && start < base + SYSTEM_RESERVED_BYTES && base < start + len
    }

    pub fn field<'m>(&self, memory: &'m [u8], field: Field) -> &'m [u8] {
        // Layout::new proved base + 4K is in range and every field sits inside 4K
        memory
            .get_ro_slice(self.addr(field), field.len)
            .unwrap_or(&[])
    }

    pub fn word(&self, memory: &[u8], field: Field) -> u16 {
        memory.get_word(self.addr(field)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_zeroed() {
        let m = SharedMemory::new();
        assert_eq!(m.bytes().len(), 0x2_0000);
        assert!(m.bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_write_slice_ok() {
        let mut m = SharedMemory::new();
        let src: &[u8] = &[0, 1, 2, 3, 4, 5, 6, 7];
        m.bytes_mut().write(src, 8).unwrap();
        assert_eq!(
            m.bytes()[..16],
            [0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7]
        );
    }

    #[test]
    fn test_read_word() {
        let mut m = SharedMemory::new();
        m.bytes_mut().write(&[0, 1, 2, 3, 4, 5, 6, 7], 0).unwrap();
        assert_eq!(m.bytes().get_word(0x4), Some(0x0405));
    }

    #[test]
    fn test_read_too_much_is_none() {
        let mut m = SharedMemory::new();
        assert!(m.bytes().get_ro_slice(0x1_fffc, 8).is_none());
        assert!(m.bytes_mut().write(&[0; 8], 0x1_fffc).is_none());
        assert!(m.bytes().get_word(u32::MAX).is_none());
        // nothing was written by the failed call
        assert_eq!(m.bytes()[0x1_fffc..], [0, 0, 0, 0]);
    }

    #[test]
    fn test_mem_layout() {
        assert_eq!(CALL_STACK.offset + CALL_STACK.len as u32, 0x0ed0);
        assert_eq!(REGISTERS.offset, 0x0ef0);
        assert_eq!(DISPLAY.offset, 0x0f00);
        assert_eq!(DISPLAY.offset as usize + DISPLAY.len, SYSTEM_RESERVED_BYTES);
        assert_eq!(CALL_STACK_WORDS, 24);
        assert_eq!(DISPLAY_SIZE_BYTES * 8, 64 * 32);
    }

    #[test]
    fn test_layout_rejects_bad_base() {
        assert!(Layout::new(0x1_f000, SHARED_SIZE_BYTES).is_ok());
        assert!(matches!(
            Layout::new(0x1_f001, SHARED_SIZE_BYTES),
            Err(HostError::LayoutMismatch { .. })
        ));
        assert!(matches!(
            Layout::new(0, PAGE_SIZE_BYTES),
            Err(HostError::LayoutMismatch { .. })
        ));
    }

    #[test]
    fn test_layout_fields_are_views() {
        let mut m = SharedMemory::new();
        let layout = Layout::new(0x1_0000, SHARED_SIZE_BYTES).unwrap();
        m.bytes_mut().write(&[0x02, 0x34], 0x1_0050).unwrap();
        m.bytes_mut().write(&[0xaa; 0x100], 0x1_0f00).unwrap();
        assert_eq!(layout.word(m.bytes(), PROGRAM_COUNTER), 0x0234);
        assert_eq!(layout.field(m.bytes(), DISPLAY), &[0xaa; 0x100][..]);
    }

    #[test]
    fn test_layout_overlap() {
        let layout = Layout::new(0x1_0000, SHARED_SIZE_BYTES).unwrap();
        assert!(!layout.overlaps(0, 0x1_0000));
        assert!(layout.overlaps(0, 0x1_0001));
        assert!(layout.overlaps(0x1_0fff, 1));
        assert!(!layout.overlaps(0x1_1000, 16));
        assert!(!layout.overlaps(0x1_0000, 0));
    }
}
