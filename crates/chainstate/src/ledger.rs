//! UTXO ledger backed by the storage trait.
//!
//! Mutations are staged in memory and committed with a single `write_batch`,
//! so a block, or a whole chain switch, is either fully applied or not
//! applied at all.

use std::collections::{HashMap, HashSet};

use ledgerd_consensus::Hash256;
use ledgerd_primitives::encoding::{DecodeError, Decoder, Encoder};
use ledgerd_primitives::outpoint::OutPoint;
use ledgerd_primitives::{Block, TxOut};
use ledgerd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::undo::BlockUndo;

pub const OUTPOINT_KEY_LEN: usize = 36;

const OP_RETURN: u8 = 0x6a;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl UtxoEntry {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.script_pubkey.len() + 16);
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.height);
        encoder.write_u8(u8::from(self.is_coinbase));
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        let height = decoder.read_u32_le()?;
        let is_coinbase = match decoder.read_u8()? {
            0 => false,
            1 => true,
            _ => return Err(DecodeError::InvalidData("invalid coinbase flag")),
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self {
            value,
            script_pubkey,
            height,
            is_coinbase,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Outputs that can never be spent are kept out of the ledger.
pub fn is_unspendable(script_pubkey: &[u8]) -> bool {
    script_pubkey.first() == Some(&OP_RETURN)
}

pub struct Ledger<S> {
    store: S,
}

impl<S> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> Ledger<S> {
    pub fn lookup(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        let key = OutPointKey::new(outpoint);
        match self.store.get(Column::Utxo, key.as_bytes())? {
            Some(bytes) => Ok(Some(
                UtxoEntry::decode(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn load_undo(&self, block_hash: &Hash256) -> Result<Option<BlockUndo>, StoreError> {
        match self.store.get(Column::BlockUndo, block_hash)? {
            Some(bytes) => Ok(Some(
                BlockUndo::decode(&bytes).map_err(|err| StoreError::Backend(err.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Start staging changes on top of the committed state.
    pub fn stage(&self) -> StagedLedger<'_, S> {
        StagedLedger {
            ledger: self,
            utxos: HashMap::new(),
            undos: HashMap::new(),
        }
    }
}

/// Ledger changes held in memory on top of the committed state.
///
/// Lookups see staged changes first. Nothing reaches the store until the
/// caller writes the batch from [`StagedLedger::into_batch`], so any number
/// of blocks can be applied or undone and then committed, or dropped, as a
/// unit.
pub struct StagedLedger<'a, S> {
    ledger: &'a Ledger<S>,
    utxos: HashMap<OutPointKey, Option<UtxoEntry>>,
    undos: HashMap<Hash256, Option<BlockUndo>>,
}

impl<S: KeyValueStore> StagedLedger<'_, S> {
    pub fn lookup(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        match self.utxos.get(&OutPointKey::new(outpoint)) {
            Some(staged) => Ok(staged.clone()),
            None => self.ledger.lookup(outpoint),
        }
    }

    pub fn load_undo(&self, block_hash: &Hash256) -> Result<Option<BlockUndo>, StoreError> {
        match self.undos.get(block_hash) {
            Some(staged) => Ok(staged.clone()),
            None => self.ledger.load_undo(block_hash),
        }
    }

    /// Stage the effect of connecting `block` at `height`.
    ///
    /// `undo` must list every pre-existing entry the block spends; outputs
    /// created and consumed inside the block are never stored.
    pub fn apply_block(
        &mut self,
        block: &Block,
        block_hash: &Hash256,
        height: i32,
        undo: &BlockUndo,
    ) {
        for spent in &undo.spent {
            self.utxos.insert(OutPointKey::new(&spent.outpoint), None);
        }
        let spent_in_block = spent_in_block(block);
        let utxos = &mut self.utxos;
        for_each_stored_output(block, &spent_in_block, |outpoint, output, is_coinbase| {
            let entry = UtxoEntry {
                value: output.value,
                script_pubkey: output.script_pubkey.clone(),
                height: height.max(0) as u32,
                is_coinbase,
            };
            utxos.insert(OutPointKey::new(&outpoint), Some(entry));
        });
        self.undos.insert(*block_hash, Some(undo.clone()));
    }

    /// Stage the exact inverse of [`StagedLedger::apply_block`].
    pub fn undo_block(&mut self, block: &Block, block_hash: &Hash256, undo: &BlockUndo) {
        let spent_in_block = spent_in_block(block);
        let utxos = &mut self.utxos;
        for_each_stored_output(block, &spent_in_block, |outpoint, _, _| {
            utxos.insert(OutPointKey::new(&outpoint), None);
        });
        for spent in undo.spent.iter().rev() {
            self.utxos
                .insert(OutPointKey::new(&spent.outpoint), Some(spent.entry.clone()));
        }
        self.undos.insert(*block_hash, None);
    }

    /// The net effect of everything staged, one operation per key.
    pub fn into_batch(self) -> WriteBatch {
        let mut utxos: Vec<_> = self.utxos.into_iter().collect();
        utxos.sort_unstable_by(|left, right| left.0.cmp(&right.0));
        let mut undos: Vec<_> = self.undos.into_iter().collect();
        undos.sort_unstable_by(|left, right| left.0.cmp(&right.0));

        let mut batch = WriteBatch::new();
        batch.reserve(utxos.len() + undos.len());
        for (key, entry) in utxos {
            match entry {
                Some(entry) => batch.put(Column::Utxo, key.as_bytes(), entry.encode()),
                None => batch.delete(Column::Utxo, key.as_bytes()),
            }
        }
        for (hash, undo) in undos {
            match undo {
                Some(undo) => batch.put(Column::BlockUndo, hash.as_slice(), undo.encode()),
                None => batch.delete(Column::BlockUndo, hash.as_slice()),
            }
        }
        batch
    }
}

fn spent_in_block(block: &Block) -> HashSet<OutPointKey> {
    block
        .transactions
        .iter()
        .filter(|tx| !tx.is_coinbase())
        .flat_map(|tx| tx.vin.iter())
        .map(|input| OutPointKey::new(&input.prevout))
        .collect()
}

fn for_each_stored_output<F>(block: &Block, spent_in_block: &HashSet<OutPointKey>, mut visit: F)
where
    F: FnMut(OutPoint, &TxOut, bool),
{
    for tx in &block.transactions {
        let txid = tx.txid();
        let is_coinbase = tx.is_coinbase();
        for (index, output) in tx.vout.iter().enumerate() {
            if is_unspendable(&output.script_pubkey) {
                continue;
            }
            let outpoint = OutPoint::new(txid, index as u32);
            if spent_in_block.contains(&OutPointKey::new(&outpoint)) {
                continue;
            }
            visit(outpoint, output, is_coinbase);
        }
    }
}
