//! The object header (spec §3/§6, component C3): the fixed 16-byte prefix
//! that precedes every managed allocation.
//!
//! Layout: 8 bytes for the type-descriptor offset into the type registry, 2
//! bytes packing color, generation and the sweep-allocated flag, and 6
//! reserved bytes (spec §6: "Object layout").

use atomic::{Atomic, Ordering};

use crate::pointer::offset::OffsetWord;
use crate::util::constants::OBJECT_HEADER_BYTES;

/// Tri-color mark state (spec §3).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    White = 0,
    Grey = 1,
    Black = 2,
}

impl Color {
    #[inline(always)]
    const fn from_bits(bits: u8) -> Color {
        match bits & 0b11 {
            0 => Color::White,
            1 => Color::Grey,
            _ => Color::Black,
        }
    }
}

/// The epoch (color bits + generation) packed into the header's second
/// 8-byte word. Bit layout, little-endian on disk:
///
/// ```text
/// byte 8:  color (2 bits) | sweep_allocated (1 bit) | unused (5 bits)
/// byte 9:  generation stamp (8 bits)
/// bytes 10-15: reserved
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct HeaderWord {
    color: Color,
    sweep_allocated: bool,
    generation: u8,
}

impl HeaderWord {
    #[inline(always)]
    fn encode(self) -> u64 {
        let mut byte0 = self.color as u8;
        if self.sweep_allocated {
            byte0 |= 0b100;
        }
        (byte0 as u64) | ((self.generation as u64) << 8)
    }

    #[inline(always)]
    fn decode(word: u64) -> Self {
        let byte0 = (word & 0xff) as u8;
        HeaderWord {
            color: Color::from_bits(byte0),
            sweep_allocated: byte0 & 0b100 != 0,
            generation: ((word >> 8) & 0xff) as u8,
        }
    }
}

/// The per-object header. Stored at the start of every allocation; the
/// object's typed body immediately follows at `header_addr +
/// OBJECT_HEADER_BYTES`.
///
/// `type_desc` and the packed color/generation/flags word are each updated
/// with a single atomic op so a concurrent marker and a concurrent mutator
/// (publishing a new object, or the collector flipping colors) never observe
/// a torn value.
#[repr(C)]
pub struct ObjectHeader {
    /// Offset of this object's type descriptor in the type registry
    /// (consumed interface, spec §6).
    type_desc: Atomic<OffsetWord>,
    packed: Atomic<u64>,
}

static_assertions::const_assert_eq!(
    std::mem::size_of::<ObjectHeader>(),
    OBJECT_HEADER_BYTES
);
// Pins the field order spec §6 assumes (type-descriptor word, then the
// packed color/generation/flags word) so a future reordering of the struct
// fails to compile instead of silently shifting the on-disk layout.
static_assertions::const_assert_eq!(memoffset::offset_of!(ObjectHeader, type_desc), 0);
static_assertions::const_assert_eq!(memoffset::offset_of!(ObjectHeader, packed), 8);

impl ObjectHeader {
    /// Initializes a header in freshly carved, unaliased memory at `ptr`.
    /// Per spec §4.2, this must run **before** the pointer is published
    /// through any write barrier.
    ///
    /// `color` should be `Color::Black` when allocating during Marking (the
    /// "Black-at-birth" rule, spec §4.2) and `Color::White` otherwise;
    /// `sweep_allocated` should be set iff the current phase is Sweeping.
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `OBJECT_HEADER_BYTES` bytes, and no
    /// other reference to this memory may exist yet.
    pub unsafe fn init_at(
        ptr: *mut ObjectHeader,
        type_desc: OffsetWord,
        epoch: u8,
        color: Color,
        sweep_allocated: bool,
    ) {
        let header = HeaderWord {
            color,
            sweep_allocated,
            generation: epoch,
        };
        std::ptr::write(
            ptr,
            ObjectHeader {
                type_desc: Atomic::new(type_desc),
                packed: Atomic::new(header.encode()),
            },
        );
    }

    #[inline(always)]
    pub fn type_desc(&self) -> OffsetWord {
        self.type_desc.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn load_word(&self) -> HeaderWord {
        HeaderWord::decode(self.packed.load(Ordering::Acquire))
    }

    #[inline(always)]
    pub fn color(&self) -> Color {
        self.load_word().color
    }

    #[inline(always)]
    pub fn generation(&self) -> u8 {
        self.load_word().generation
    }

    #[inline(always)]
    pub fn sweep_allocated(&self) -> bool {
        self.load_word().sweep_allocated
    }

    /// "live this epoch" iff the generation matches the current epoch and
    /// the color is not White (spec §3: epoch color).
    #[inline(always)]
    pub fn is_live(&self, current_epoch: u8) -> bool {
        let w = self.load_word();
        w.generation == current_epoch && w.color != Color::White
    }

    /// Atomically transitions this header's color via compare-and-swap,
    /// retrying on spurious races with other header fields packed in the
    /// same word (there are none today, but the header's other bits may
    /// grow; the loop keeps the operation correct regardless).
    #[inline(always)]
    pub fn try_set_color(&self, expected: Color, new: Color) -> bool {
        loop {
            let current = self.packed.load(Ordering::Acquire);
            let decoded = HeaderWord::decode(current);
            if decoded.color != expected {
                return false;
            }
            let next = HeaderWord { color: new, ..decoded }.encode();
            match self.packed.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(_) => continue,
            }
        }
    }

    /// Unconditionally sets the color, generation and sweep-allocated flag.
    /// Used by the collector's epoch rotation (spec §4.6 step 1) and by the
    /// sweeper when clearing `sweep_allocated` on survivors.
    #[inline(always)]
    pub fn set(&self, color: Color, generation: u8, sweep_allocated: bool) {
        let header = HeaderWord {
            color,
            sweep_allocated,
            generation,
        };
        self.packed.store(header.encode(), Ordering::Release);
    }

    #[inline(always)]
    pub fn clear_sweep_allocated(&self) {
        loop {
            let current = self.packed.load(Ordering::Acquire);
            let mut decoded = HeaderWord::decode(current);
            if !decoded.sweep_allocated {
                return;
            }
            decoded.sweep_allocated = false;
            if self
                .packed
                .compare_exchange_weak(
                    current,
                    decoded.encode(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return;
            }
        }
    }
}
