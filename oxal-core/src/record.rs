// oxal-core: Per-slot resource records shared by every ID class

use arrayvec::ArrayString;
use bitflags::bitflags;

use crate::config;
use crate::id::ObjectId;

/// Fixed-capacity object name stored inline in the record.
pub type ObjectName = ArrayString<{ config::MAX_NAME_LEN }>;

bitflags! {
    /// Per-record flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        /// An exclusive operation is parked on this slot waiting for the
        /// refcount to drain to zero.
        const EXCL_REQ = 0b0000_0001;
    }
}

/// One slot of a class table.
///
/// `active_id` is the slot's state word: [`ObjectId::UNDEFINED`] while free,
/// [`ObjectId::RESERVED`] while an allocation is in flight, and the
/// published identifier otherwise. The hidden serial persists across
/// free/reuse so each reallocation mints a fresh generation.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub active_id: ObjectId,
    pub name: ObjectName,
    pub creator: ObjectId,
    pub refcount: u32,
    pub flags: RecordFlags,
    pub(crate) serial: u32,
}

impl ObjectRecord {
    /// A never-used slot at the given index.
    pub(crate) fn vacant(index: usize) -> ObjectRecord {
        ObjectRecord {
            active_id: ObjectId::UNDEFINED,
            name: ObjectName::new(),
            creator: ObjectId::UNDEFINED,
            refcount: 0,
            flags: RecordFlags::empty(),
            serial: index as u32,
        }
    }

    /// True when the slot holds no object and no reservation.
    #[inline(always)]
    pub fn is_free(&self) -> bool {
        self.active_id == ObjectId::UNDEFINED
    }

    /// True when the slot holds a published object.
    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active_id.is_defined()
    }

    /// Return the slot to the free state, keeping the serial so the next
    /// occupant gets a fresh generation.
    pub(crate) fn clear(&mut self) {
        self.active_id = ObjectId::UNDEFINED;
        self.name.clear();
        self.creator = ObjectId::UNDEFINED;
        self.refcount = 0;
        self.flags = RecordFlags::empty();
    }
}
