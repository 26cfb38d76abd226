use byteorder::{ByteOrder, LittleEndian};

use crate::common::{BYTE_SLOTS_PER_PAGE, HEAP_PAGE_SIZE, NODE_SLOTS_PER_PAGE};

use super::descriptor::NodeDescriptor;

/// Header of a Node page: a chain pointer plus a 64-bit occupancy bitmap
/// over the 64 [`NodeDescriptor`] slots that follow it on disk.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NodePageDescriptor {
    pub next_node_page: u64,
    pub node_map: u64,
}

impl NodePageDescriptor {
    pub const SIZE: usize = 8 + 8;

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.next_node_page);
        LittleEndian::write_u64(&mut buf[8..16], self.node_map);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        NodePageDescriptor {
            next_node_page: LittleEndian::read_u64(&buf[0..8]),
            node_map: LittleEndian::read_u64(&buf[8..16]),
        }
    }

    pub fn is_full(&self) -> bool {
        self.node_map == u64::MAX
    }
}

/// Size in bytes of a single Node page, including its descriptor.
pub const NODE_PAGE_SIZE: usize =
    NodePageDescriptor::SIZE + NODE_SLOTS_PER_PAGE * NodeDescriptor::SIZE;

/// Header of a Heap page: a single chain pointer. The remainder of the page
/// is opaque heap payload, owned by [`crate::heap::MemoryBlockList`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeapPageDescriptor {
    pub next_heap_page: u64,
}

impl HeapPageDescriptor {
    pub const SIZE: usize = 8;

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.next_heap_page);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        HeapPageDescriptor {
            next_heap_page: LittleEndian::read_u64(&buf[0..8]),
        }
    }
}

/// Number of payload bytes carried by a single heap page.
pub const HEAP_PAGE_PAYLOAD: usize = HEAP_PAGE_SIZE - HeapPageDescriptor::SIZE;

/// Header of a Byte page: a chain pointer plus a 64-bit occupancy bitmap
/// over the 64 single-byte slots that follow it on disk.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BytePageDescriptor {
    pub next_byte_page: u64,
    pub byte_map: u64,
}

impl BytePageDescriptor {
    pub const SIZE: usize = 8 + 8;

    pub fn write_to(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.next_byte_page);
        LittleEndian::write_u64(&mut buf[8..16], self.byte_map);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        BytePageDescriptor {
            next_byte_page: LittleEndian::read_u64(&buf[0..8]),
            byte_map: LittleEndian::read_u64(&buf[8..16]),
        }
    }

    pub fn is_full(&self) -> bool {
        self.byte_map == u64::MAX
    }
}

/// Size in bytes of a single Byte page, including its descriptor.
pub const BYTE_PAGE_SIZE: usize = BytePageDescriptor::SIZE + BYTE_SLOTS_PER_PAGE;
