//! In-memory block index arena.
//!
//! Nodes are keyed by hash and never removed; `children` is a secondary map
//! from a parent hash to the hashes built on it. Valid nodes are also kept in
//! an ordered candidate set so the best tip is found without a scan.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use ledgerd_consensus::constants::MEDIAN_TIME_SPAN;
use ledgerd_consensus::Hash256;
use ledgerd_pow::{block_proof, HeaderInfo};
use ledgerd_primitives::encoding::{DecodeError, Decoder, Encoder};
use ledgerd_primitives::BlockHeader;
use primitive_types::U256;
use smallvec::SmallVec;

const BLOCK_NODE_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BlockStatus {
    Unknown,
    HeaderSeen,
    DataReceived,
    ContextuallyValid,
    FullyValid,
    Rejected,
}

impl BlockStatus {
    /// Status only moves forward; `Rejected` is reachable from any state
    /// and terminal.
    pub fn can_become(self, next: BlockStatus) -> bool {
        match (self, next) {
            (BlockStatus::Rejected, _) => false,
            (_, BlockStatus::Rejected) => true,
            (current, next) => next > current,
        }
    }

    /// Eligible to be (part of) the active chain.
    pub fn is_valid(self) -> bool {
        matches!(
            self,
            BlockStatus::ContextuallyValid | BlockStatus::FullyValid
        )
    }

    fn to_u8(self) -> u8 {
        match self {
            BlockStatus::Unknown => 0,
            BlockStatus::HeaderSeen => 1,
            BlockStatus::DataReceived => 2,
            BlockStatus::ContextuallyValid => 3,
            BlockStatus::FullyValid => 4,
            BlockStatus::Rejected => 5,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => BlockStatus::Unknown,
            1 => BlockStatus::HeaderSeen,
            2 => BlockStatus::DataReceived,
            3 => BlockStatus::ContextuallyValid,
            4 => BlockStatus::FullyValid,
            5 => BlockStatus::Rejected,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockNode {
    pub hash: Hash256,
    /// `None` only for the genesis block.
    pub parent: Option<Hash256>,
    pub height: i32,
    pub chainwork: U256,
    pub status: BlockStatus,
    /// First-seen order; breaks chainwork ties.
    pub seq: u64,
    pub time: u32,
    pub bits: u32,
    pub tx_count: u32,
    /// Transactions in the chain up to and including this block.
    pub chain_tx: u64,
}

impl BlockNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(100);
        encoder.write_u8(BLOCK_NODE_VERSION);
        match &self.parent {
            Some(parent) => {
                encoder.write_u8(1);
                encoder.write_hash(parent);
            }
            None => encoder.write_u8(0),
        }
        encoder.write_i32_le(self.height);
        encoder.write_bytes(&self.chainwork.to_little_endian());
        encoder.write_u8(self.status.to_u8());
        encoder.write_u64_le(self.seq);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.tx_count);
        encoder.write_u64_le(self.chain_tx);
        encoder.into_inner()
    }

    pub fn decode(hash: Hash256, bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_u8()? != BLOCK_NODE_VERSION {
            return Err(DecodeError::InvalidData("unsupported block node version"));
        }
        let parent = match decoder.read_u8()? {
            0 => None,
            1 => Some(decoder.read_hash()?),
            _ => return Err(DecodeError::InvalidData("invalid parent flag")),
        };
        let height = decoder.read_i32_le()?;
        let chainwork = U256::from_little_endian(&decoder.read_fixed::<32>()?);
        let status = BlockStatus::from_u8(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("invalid block status"))?;
        let node = Self {
            hash,
            parent,
            height,
            chainwork,
            status,
            seq: decoder.read_u64_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            tx_count: decoder.read_u32_le()?,
            chain_tx: decoder.read_u64_le()?,
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(node)
    }
}

type CandidateKey = (Reverse<U256>, u64, Hash256);

fn candidate_key(node: &BlockNode) -> CandidateKey {
    (Reverse(node.chainwork), node.seq, node.hash)
}

#[derive(Debug, Default)]
pub struct BlockIndex {
    nodes: HashMap<Hash256, BlockNode>,
    children: HashMap<Hash256, SmallVec<[Hash256; 2]>>,
    candidates: BTreeSet<CandidateKey>,
    next_seq: u64,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, hash: &Hash256) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash256) -> Option<&BlockNode> {
        self.nodes.get(hash)
    }

    pub fn children(&self, hash: &Hash256) -> &[Hash256] {
        self.children
            .get(hash)
            .map(|children| children.as_slice())
            .unwrap_or(&[])
    }

    /// Insert a node loaded from storage, keeping its recorded `seq`.
    pub fn insert(&mut self, node: BlockNode) {
        self.next_seq = self.next_seq.max(node.seq.saturating_add(1));
        if let Some(parent) = node.parent {
            let children = self.children.entry(parent).or_default();
            if !children.contains(&node.hash) {
                children.push(node.hash);
            }
        }
        let key = candidate_key(&node);
        let valid = node.status.is_valid();
        if let Some(previous) = self.nodes.insert(node.hash, node) {
            self.candidates.remove(&candidate_key(&previous));
        }
        if valid {
            self.candidates.insert(key);
        }
    }

    /// Index a newly seen header on top of `header.prev_block`, or as a
    /// genesis node when `is_genesis` is set. Returns `None` when the parent
    /// is not indexed.
    pub fn add_header(
        &mut self,
        hash: Hash256,
        header: &BlockHeader,
        tx_count: u32,
        is_genesis: bool,
    ) -> Option<&BlockNode> {
        if self.nodes.contains_key(&hash) {
            return self.nodes.get(&hash);
        }
        // Undecodable bits add no work; the pow check rejects the block.
        let work = block_proof(header.bits).unwrap_or_else(|_| U256::zero());
        let (parent, height, chainwork, chain_tx) = if is_genesis {
            (None, 0, work, u64::from(tx_count))
        } else {
            let parent = self.nodes.get(&header.prev_block)?;
            (
                Some(parent.hash),
                parent.height + 1,
                parent.chainwork.saturating_add(work),
                parent.chain_tx.saturating_add(u64::from(tx_count)),
            )
        };
        let node = BlockNode {
            hash,
            parent,
            height,
            chainwork,
            status: BlockStatus::HeaderSeen,
            seq: self.next_seq,
            time: header.time,
            bits: header.bits,
            tx_count,
            chain_tx,
        };
        self.insert(node);
        self.nodes.get(&hash)
    }

    /// Move `hash` to `status` if the transition is allowed. Returns whether
    /// the node changed.
    pub fn set_status(&mut self, hash: &Hash256, status: BlockStatus) -> bool {
        let Some(node) = self.nodes.get_mut(hash) else {
            return false;
        };
        if !node.status.can_become(status) {
            return false;
        }
        let key = candidate_key(node);
        node.status = status;
        if status.is_valid() {
            self.candidates.insert(key);
        } else {
            self.candidates.remove(&key);
        }
        true
    }

    /// The valid node with the greatest chainwork; ties go to the node seen
    /// first.
    pub fn best_candidate(&self) -> Option<&BlockNode> {
        self.candidates
            .iter()
            .next()
            .and_then(|(_, _, hash)| self.nodes.get(hash))
    }

    pub fn ancestor(&self, hash: &Hash256, height: i32) -> Option<&BlockNode> {
        let mut node = self.nodes.get(hash)?;
        if height < 0 || height > node.height {
            return None;
        }
        while node.height > height {
            node = self.nodes.get(&node.parent?)?;
        }
        Some(node)
    }

    /// Last common ancestor of `a` and `b`.
    pub fn find_fork(&self, a: &Hash256, b: &Hash256) -> Option<Hash256> {
        let mut left = self.nodes.get(a)?;
        let mut right = self.nodes.get(b)?;
        while left.height > right.height {
            left = self.nodes.get(&left.parent?)?;
        }
        while right.height > left.height {
            right = self.nodes.get(&right.parent?)?;
        }
        while left.hash != right.hash {
            left = self.nodes.get(&left.parent?)?;
            right = self.nodes.get(&right.parent?)?;
        }
        Some(left.hash)
    }

    /// Hashes strictly after `ancestor` up to and including `tip`, in height
    /// order. Empty when `ancestor` is not on the path.
    pub fn path(&self, ancestor: Option<&Hash256>, tip: &Hash256) -> Vec<Hash256> {
        let mut out = Vec::new();
        let mut cursor = self.nodes.get(tip);
        while let Some(node) = cursor {
            if Some(&node.hash) == ancestor {
                out.reverse();
                return out;
            }
            out.push(node.hash);
            cursor = node.parent.as_ref().and_then(|parent| self.nodes.get(parent));
        }
        if ancestor.is_none() {
            out.reverse();
            return out;
        }
        Vec::new()
    }

    /// Every node built on `hash`, breadth first.
    pub fn descendants(&self, hash: &Hash256) -> Vec<Hash256> {
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::from([*hash]);
        while let Some(next) = queue.pop_front() {
            for child in self.children(&next) {
                out.push(*child);
                queue.push_back(*child);
            }
        }
        out
    }

    /// Median header time of `hash` and up to ten of its ancestors.
    pub fn median_time_past(&self, hash: &Hash256) -> Option<i64> {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = self.nodes.get(hash);
        while let Some(node) = cursor {
            if times.len() == MEDIAN_TIME_SPAN {
                break;
            }
            times.push(i64::from(node.time));
            cursor = node.parent.as_ref().and_then(|parent| self.nodes.get(parent));
        }
        if times.is_empty() {
            return None;
        }
        times.sort_unstable();
        Some(times[times.len() / 2])
    }

    /// Up to `count` headers ending at `hash`, in height order.
    pub fn header_chain(&self, hash: &Hash256, count: usize) -> Vec<HeaderInfo> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = self.nodes.get(hash);
        while let Some(node) = cursor {
            if out.len() == count {
                break;
            }
            out.push(HeaderInfo {
                height: i64::from(node.height),
                time: i64::from(node.time),
                bits: node.bits,
            });
            cursor = node.parent.as_ref().and_then(|parent| self.nodes.get(parent));
        }
        out.reverse();
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockNode> {
        self.nodes.values()
    }
}
