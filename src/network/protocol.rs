//! Wire messages produced and consumed by the download protocol
//!
//! Only the inventory subset the scheduler touches: `getdata` requests out,
//! `block` messages in.

use serde::{Deserialize, Serialize};

use crate::chain::{Block, Hash};

/// Inventory type for a full block.
pub const MSG_BLOCK: u32 = 2;

/// Bit set on a block inventory type to request witness serialization.
pub const INV_WITNESS_FLAG: u32 = 0x4000_0000;

/// Inventory type for a block with witness data.
pub const MSG_WITNESS_BLOCK: u32 = MSG_BLOCK | INV_WITNESS_FLAG;

/// Protocol cap on entries in a single `getdata`/`inv` message.
pub const MAX_INV_ENTRIES: usize = 50_000;

/// Inventory vector entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub inv_type: u32,
    pub hash: Hash,
}

impl InventoryItem {
    pub fn block(hash: Hash) -> Self {
        Self {
            inv_type: MSG_BLOCK,
            hash,
        }
    }

    /// Whether this entry names a block, with or without witness data.
    pub fn is_block_type(&self) -> bool {
        (self.inv_type & !INV_WITNESS_FLAG) == MSG_BLOCK
    }
}

/// `getdata` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataMessage {
    pub inventory: Vec<InventoryItem>,
}

impl GetDataMessage {
    /// Rewrite block entries to their witness variants.
    pub fn to_witness(&mut self) {
        for item in &mut self.inventory {
            if item.is_block_type() {
                item.inv_type |= INV_WITNESS_FLAG;
            }
        }
    }
}

/// `block` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub block: Block,
}

/// Messages exchanged on a download channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    GetData(GetDataMessage),
    Block(BlockMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_witness_rewrites_block_entries() {
        let mut message = GetDataMessage {
            inventory: vec![InventoryItem::block([1u8; 32]), InventoryItem::block([2u8; 32])],
        };
        message.to_witness();
        assert!(message
            .inventory
            .iter()
            .all(|item| item.inv_type == MSG_WITNESS_BLOCK));
    }

    #[test]
    fn test_to_witness_is_idempotent() {
        let mut message = GetDataMessage {
            inventory: vec![InventoryItem::block([1u8; 32])],
        };
        message.to_witness();
        message.to_witness();
        assert_eq!(message.inventory[0].inv_type, MSG_WITNESS_BLOCK);
        assert!(message.inventory[0].is_block_type());
    }
}
