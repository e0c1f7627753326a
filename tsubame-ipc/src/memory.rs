//! メモリ読み取りと疎なメモリダンプ

use crate::Koid;

/// メモリ読み取り要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadMemoryRequest {
    pub process_koid: Koid,
    pub address: u64,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMemoryReply {
    pub blocks: Vec<MemoryBlock>,
}

/// 連続したメモリ領域
///
/// `valid == false` の場合は未マッピング領域で、`data` は空です。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    pub address: u64,
    pub valid: bool,
    pub size: u64,
    pub data: Vec<u8>,
}

impl MemoryBlock {
    /// マッピング済みの領域
    pub fn mapped(address: u64, data: Vec<u8>) -> Self {
        Self {
            address,
            valid: true,
            size: data.len() as u64,
            data,
        }
    }

    /// 未マッピングの領域
    pub fn unmapped(address: u64, size: u64) -> Self {
        Self {
            address,
            valid: false,
            size,
            data: Vec::new(),
        }
    }

    /// 領域の終端（この番地は含まない）
    pub fn end(&self) -> u64 {
        self.address + self.size
    }
}

/// 未マッピングの穴を含みうるメモリダンプ
///
/// ブロックはアドレス順に隙間なく並んでいることを前提とします。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryDump {
    blocks: Vec<MemoryBlock>,
}

impl MemoryDump {
    /// ブロック列からダンプを作成する
    pub fn new(blocks: Vec<MemoryBlock>) -> Self {
        Self { blocks }
    }

    /// 開始アドレス
    pub fn address(&self) -> u64 {
        self.blocks.first().map(|b| b.address).unwrap_or(0)
    }

    /// 全体のサイズ
    pub fn size(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }

    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    /// 全領域がマッピングされているか
    pub fn all_valid(&self) -> bool {
        self.blocks.iter().all(|b| b.valid)
    }

    /// 1バイト取得する（未マッピングや範囲外なら None）
    pub fn get_byte(&self, address: u64) -> Option<u8> {
        let block = self
            .blocks
            .iter()
            .find(|b| address >= b.address && address < b.end())?;
        if !block.valid {
            return None;
        }
        block.data.get((address - block.address) as usize).copied()
    }

    /// 全領域が有効な場合に連結したバイト列を返す
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if !self.all_valid() {
            return None;
        }
        Some(self.blocks.iter().flat_map(|b| b.data.iter().copied()).collect())
    }
}

impl From<ReadMemoryReply> for MemoryDump {
    fn from(reply: ReadMemoryReply) -> Self {
        MemoryDump::new(reply.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dump() -> MemoryDump {
        MemoryDump::new(vec![
            MemoryBlock::mapped(0x1000, vec![1, 2, 3, 4]),
            MemoryBlock::unmapped(0x1004, 0x10),
            MemoryBlock::mapped(0x1014, vec![9]),
        ])
    }

    #[test]
    fn test_dump_geometry() {
        let dump = sample_dump();
        assert_eq!(dump.address(), 0x1000);
        assert_eq!(dump.size(), 4 + 0x10 + 1);
        assert!(!dump.all_valid());
        assert!(dump.to_bytes().is_none());
    }

    #[test]
    fn test_get_byte() {
        let dump = sample_dump();
        assert_eq!(dump.get_byte(0x1002), Some(3));
        assert_eq!(dump.get_byte(0x1008), None);
        assert_eq!(dump.get_byte(0x1014), Some(9));
        assert_eq!(dump.get_byte(0x2000), None);
    }
}
