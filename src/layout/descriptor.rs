use super::VarType;
use byteorder::{ByteOrder, LittleEndian};

/// A single node slot: either a container (its heap region's `(index,
/// size)`), a primitive (an inline or byte-indexed value per type), or an
/// empty slot (`type == End`).
///
/// Packed on-disk layout, 24 bytes: `type: u8`, 7 reserved bytes, `size:
/// u64`, `index: u64`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NodeDescriptor {
    pub r#type: VarType,
    pub size: u64,
    pub index: u64,
}

impl NodeDescriptor {
    pub const SIZE: usize = 1 + 7 + 8 + 8;

    pub const EMPTY: NodeDescriptor = NodeDescriptor {
        r#type: VarType::End,
        size: 0,
        index: 0,
    };

    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= Self::SIZE);
        buf[0] = self.r#type.as_u8();
        for b in &mut buf[1..8] {
            *b = 0;
        }
        LittleEndian::write_u64(&mut buf[8..16], self.size);
        LittleEndian::write_u64(&mut buf[16..24], self.index);
    }

    pub fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= Self::SIZE);
        NodeDescriptor {
            r#type: VarType::from_u8(buf[0]),
            size: LittleEndian::read_u64(&buf[8..16]),
            index: LittleEndian::read_u64(&buf[16..24]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.r#type == VarType::End
    }
}
