//! Physical map - two-level address translation
//!
//! Resolves 32-bit virtual addresses through a directory/table pair
//! with the classic 10/10/12 split:
//!
//! ```text
//!   31        22 21        12 11         0
//!   [ dir index ][ tbl index ][  offset   ]
//! ```
//!
//! Translation is a pure walk over a [`PageDirectory`] passed in by the
//! caller; no live paging state is consulted, which keeps the walk
//! testable and usable against any address space, not just the current
//! one. The directory carries both the hardware entry image and the
//! kernel's own view of each second-level table.
//!
//! Physical address zero stands for "unmapped". Frame zero is burned
//! for this; the boot path never hands it out.
//!
//! # The self-map
//!
//! In production the last directory slot maps the directory itself, so
//! a reserved 4 MiB virtual window ([`SELFMAP_BASE`]) exposes every
//! second-level table as an ordinary page: the table controlling
//! directory slot `n` appears at `table_window(n)`, and the directory
//! appears at `dir_window()` because the self-referencing slot makes
//! the directory double as its own table. The window addresses are pure
//! arithmetic on the slot number; nothing here walks hardware state.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use bitflags::bitflags;

pub const PAGE_SIZE: u32 = 4096;
/// Entries per directory and per table
pub const PT_ENTRIES: usize = 1024;

/// Directory slot reserved for the self-map
pub const SELFMAP_SLOT: usize = 1023;
/// Base of the 4 MiB virtual window exposed by the self-map, one slice
/// kernel-wide
pub const SELFMAP_BASE: u32 = 0xFFC0_0000;

const FRAME_MASK: u32 = 0xFFFF_F000;

// ============================================================================
// Addresses
// ============================================================================

/// 32-bit virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub u32);

impl VirtAddr {
    /// Top 10 bits: directory slot
    pub fn dir_index(self) -> usize {
        (self.0 >> 22) as usize
    }

    /// Middle 10 bits: table slot
    pub fn table_index(self) -> usize {
        ((self.0 >> 12) & 0x3FF) as usize
    }

    /// Low 12 bits: byte offset within the page
    pub fn offset(self) -> u32 {
        self.0 & 0xFFF
    }
}

/// 32-bit physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PhysAddr(pub u32);

impl PhysAddr {
    /// The "no translation" sentinel. Physical frame zero is reserved
    /// to keep this unambiguous.
    pub const UNMAPPED: PhysAddr = PhysAddr(0);

    pub fn is_unmapped(self) -> bool {
        self == Self::UNMAPPED
    }
}

// ============================================================================
// Page Table Entries
// ============================================================================

bitflags! {
    /// Low-bit attributes of a page-table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
    }
}

/// One hardware entry: frame base in the high 20 bits, flags below.
/// Bit-exact with what the MMU consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Pte(pub u32);

impl Pte {
    pub const ABSENT: Pte = Pte(0);

    pub fn new(frame: PhysAddr, flags: PteFlags) -> Self {
        Pte((frame.0 & FRAME_MASK) | flags.bits())
    }

    pub fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    pub fn frame(self) -> PhysAddr {
        PhysAddr(self.0 & FRAME_MASK)
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & !FRAME_MASK)
    }
}

/// Second-level table, one page of entries
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [Pte; PT_ENTRIES],
}

impl PageTable {
    pub const fn empty() -> Self {
        Self {
            entries: [Pte::ABSENT; PT_ENTRIES],
        }
    }

    /// Point table slot `index` at `frame`, PRESENT implied
    pub fn map(&mut self, index: usize, frame: PhysAddr, flags: PteFlags) {
        self.entries[index] = Pte::new(frame, flags | PteFlags::PRESENT);
    }
}

// ============================================================================
// Page Directory
// ============================================================================

/// The top level of one address space.
///
/// `entries` is the hardware image the MMU would walk; `tables` is the
/// kernel's handle on each second-level table, keyed by slot. Both are
/// updated together by [`PageDirectory::map_table`], so a present entry
/// without a kernel view (outside the self-map slot) can only mean
/// corrupted bookkeeping.
pub struct PageDirectory {
    entries: [Pte; PT_ENTRIES],
    tables: BTreeMap<usize, Box<PageTable>>,
}

impl PageDirectory {
    pub fn new() -> Self {
        Self {
            entries: [Pte::ABSENT; PT_ENTRIES],
            tables: BTreeMap::new(),
        }
    }

    /// Install a second-level table: hardware entry and kernel view in
    /// one step. `frame` is the physical page holding the table.
    pub fn map_table(&mut self, slot: usize, frame: PhysAddr, table: Box<PageTable>) {
        self.entries[slot] = Pte::new(frame, PteFlags::PRESENT | PteFlags::WRITABLE);
        self.tables.insert(slot, table);
    }

    pub fn entry(&self, slot: usize) -> Pte {
        self.entries[slot]
    }

    pub fn table(&self, slot: usize) -> Option<&PageTable> {
        self.tables.get(&slot).map(Box::as_ref)
    }

    pub fn table_mut(&mut self, slot: usize) -> Option<&mut PageTable> {
        self.tables.get_mut(&slot).map(Box::as_mut)
    }

    /// Point the reserved last slot at the directory's own frame. After
    /// this the MMU resolves the [`SELFMAP_BASE`] window to the paging
    /// structures themselves.
    pub fn install_selfmap(&mut self, dir_frame: PhysAddr) {
        self.entries[SELFMAP_SLOT] = Pte::new(dir_frame, PteFlags::PRESENT | PteFlags::WRITABLE);
    }
}

impl Default for PageDirectory {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Translation
// ============================================================================

/// Walk `dir` for `va`. `None` when either level is absent.
///
/// An absent directory entry short-circuits; the second level is never
/// touched for it, so low address bits cannot influence the outcome.
pub fn lookup(dir: &PageDirectory, va: VirtAddr) -> Option<PhysAddr> {
    let dirent = dir.entries[va.dir_index()];
    if !dirent.is_present() {
        return None;
    }

    let pte = match dir.tables.get(&va.dir_index()) {
        Some(table) => table.entries[va.table_index()],
        // Through the self-map the directory doubles as its own table
        None if va.dir_index() == SELFMAP_SLOT => dir.entries[va.table_index()],
        None => panic!(
            "directory slot {} present without a kernel table view",
            va.dir_index()
        ),
    };

    if !pte.is_present() {
        return None;
    }
    Some(PhysAddr(pte.frame().0 | va.offset()))
}

/// Walk `dir` for `va`, collapsing "no translation" to
/// [`PhysAddr::UNMAPPED`]
pub fn extract(dir: &PageDirectory, va: VirtAddr) -> PhysAddr {
    lookup(dir, va).unwrap_or(PhysAddr::UNMAPPED)
}

/// Virtual address at which the self-map exposes the table controlling
/// directory slot `slot`. Pure arithmetic on the slot number.
pub fn table_window(slot: usize) -> VirtAddr {
    VirtAddr(SELFMAP_BASE + (slot as u32) * PAGE_SIZE)
}

/// Virtual address of the directory itself inside the self-map window
pub fn dir_window() -> VirtAddr {
    table_window(SELFMAP_SLOT)
}
