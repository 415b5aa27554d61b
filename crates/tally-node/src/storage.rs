//! RocksDB-backed persistent ledger storage.
//!
//! Implements [`LedgerStore`] using RocksDB column families for outputs,
//! the per-address output index, transaction records, the height → block id
//! index, and metadata. Every [`LedgerBatch`] is written with one atomic
//! [`WriteBatch`], so a crash never leaves half a block behind.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, SliceTransform, WriteBatch, DB};

use tally_core::error::StoreError;
use tally_core::types::{Address, Hash256, OutputId};
use tally_wallet::history::{RecordKey, TxRecord};
use tally_wallet::outputs::OutputEntry;
use tally_wallet::store::{BatchOp, LedgerBatch, LedgerStore};
use tally_wallet::ChainCursor;

// --- Column family names ---

const CF_OUTPUTS: &str = "outputs";
const CF_ADDRESS_INDEX: &str = "address_index";
const CF_RECORDS: &str = "records";
const CF_BLOCK_INDEX: &str = "block_index";
const CF_METADATA: &str = "metadata";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_OUTPUTS,
    CF_ADDRESS_INDEX,
    CF_RECORDS,
    CF_BLOCK_INDEX,
    CF_METADATA,
];

// --- Metadata keys ---

const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_TIP_HASH: &[u8] = b"tip_hash";
const META_RECORD_COUNT: &[u8] = b"record_count";
const META_OUTPUT_COUNT: &[u8] = b"output_count";
const META_WATCH_SET: &[u8] = b"watch_set";

/// RocksDB-backed ledger storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist. A fresh database
    /// reads back as an empty cursor with no outputs or records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| {
                let mut opts = Options::default();
                // Address index keys start with the 32-byte address.
                if *name == CF_ADDRESS_INDEX {
                    opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(32));
                }
                ColumnFamilyDescriptor::new(*name, opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Trigger manual compaction across all column families.
    pub fn compact(&self) -> Result<(), StoreError> {
        for cf_name in ALL_CFS {
            let cf = self.cf_handle(cf_name)?;
            self.db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        }
        Ok(())
    }

    /// Watched addresses this ledger was built with, if recorded.
    pub fn watch_addresses(&self) -> Result<Option<Vec<Address>>, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .get_cf(cf, META_WATCH_SET)
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    pub fn set_watch_addresses(&self, addresses: &[Address]) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        self.db
            .put_cf(cf, META_WATCH_SET, encode(&addresses.to_vec())?)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Get a column family handle.
    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Backend(format!("missing column family: {name}")))
    }

    fn get_meta_u64(&self, key: &[u8]) -> Result<u64, StoreError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(u64::from_le_bytes(fixed::<8>(&bytes, "metadata value")?)),
            None => Ok(0),
        }
    }

    /// Encode an output id key: txid || index(BE).
    fn output_key(id: &OutputId) -> [u8; 40] {
        let mut key = [0u8; 40];
        key[0..32].copy_from_slice(id.txid.as_bytes());
        key[32..40].copy_from_slice(&id.index.to_be_bytes());
        key
    }

    /// Encode an address index key: address || txid || index(BE).
    fn address_index_key(address: &Address, id: &OutputId) -> [u8; 72] {
        let mut key = [0u8; 72];
        key[0..32].copy_from_slice(address.as_bytes());
        key[32..72].copy_from_slice(&Self::output_key(id));
        key
    }

    /// Encode a record key: height(BE) || index(BE). Sorts in pagination order.
    fn record_key(key: &RecordKey) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&key.height.to_be_bytes());
        bytes[8..16].copy_from_slice(&key.index.to_be_bytes());
        bytes
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    fn decode_output_id(key: &[u8]) -> Result<OutputId, StoreError> {
        let key = fixed::<40>(key, "output key")?;
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&key[0..32]);
        let mut index = [0u8; 8];
        index.copy_from_slice(&key[32..40]);
        Ok(OutputId::new(Hash256(txid), u64::from_be_bytes(index)))
    }

    fn stage(&self, wb: &mut WriteBatch, op: &BatchOp) -> Result<(), StoreError> {
        match op {
            BatchOp::PutOutput(id, entry) => {
                wb.put_cf(self.cf_handle(CF_OUTPUTS)?, Self::output_key(id), encode(entry)?);
                wb.put_cf(
                    self.cf_handle(CF_ADDRESS_INDEX)?,
                    Self::address_index_key(&entry.address, id),
                    b"",
                );
            }
            BatchOp::DeleteOutput(id, entry) => {
                wb.delete_cf(self.cf_handle(CF_OUTPUTS)?, Self::output_key(id));
                wb.delete_cf(
                    self.cf_handle(CF_ADDRESS_INDEX)?,
                    Self::address_index_key(&entry.address, id),
                );
            }
            BatchOp::PutRecord(record) => {
                wb.put_cf(
                    self.cf_handle(CF_RECORDS)?,
                    Self::record_key(&record.key()),
                    encode(record)?,
                );
            }
            BatchOp::DeleteRecord(key) => {
                wb.delete_cf(self.cf_handle(CF_RECORDS)?, Self::record_key(key));
            }
            BatchOp::PutBlockId(height, id) => {
                wb.put_cf(
                    self.cf_handle(CF_BLOCK_INDEX)?,
                    Self::height_key(*height),
                    id.as_bytes(),
                );
            }
            BatchOp::DeleteBlockId(height) => {
                wb.delete_cf(self.cf_handle(CF_BLOCK_INDEX)?, Self::height_key(*height));
            }
        }
        Ok(())
    }
}

impl LedgerStore for RocksStore {
    fn get_output(&self, id: &OutputId) -> Result<Option<OutputEntry>, StoreError> {
        let cf = self.cf_handle(CF_OUTPUTS)?;
        self.db
            .get_cf(cf, Self::output_key(id))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Uses prefix iteration over the address index, then point lookups.
    fn outputs_by_address(
        &self,
        address: &Address,
    ) -> Result<Vec<(OutputId, OutputEntry)>, StoreError> {
        let cf_addr = self.cf_handle(CF_ADDRESS_INDEX)?;
        let prefix = address.as_bytes();

        let mut result = Vec::new();
        for item in self.db.prefix_iterator_cf(cf_addr, prefix) {
            let (key_bytes, _) = item.map_err(|e| StoreError::Backend(e.to_string()))?;

            // prefix_iterator may overshoot
            if key_bytes.len() != 72 || &key_bytes[0..32] != prefix {
                break;
            }

            let id = Self::decode_output_id(&key_bytes[32..])?;
            match self.get_output(&id)? {
                Some(entry) => result.push((id, entry)),
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "address index points at missing output {id}"
                    )));
                }
            }
        }
        Ok(result)
    }

    fn output_count(&self) -> Result<u64, StoreError> {
        self.get_meta_u64(META_OUTPUT_COUNT)
    }

    fn get_record(&self, key: &RecordKey) -> Result<Option<TxRecord>, StoreError> {
        let cf = self.cf_handle(CF_RECORDS)?;
        self.db
            .get_cf(cf, Self::record_key(key))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn records_at_height(&self, height: u64) -> Result<Vec<TxRecord>, StoreError> {
        let cf = self.cf_handle(CF_RECORDS)?;
        let start = Self::record_key(&RecordKey::new(height, 0));
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward)) {
            let (key_bytes, value_bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
            if key_bytes.len() != 16 || key_bytes[0..8] != Self::height_key(height) {
                break;
            }
            records.push(decode(&value_bytes)?);
        }
        Ok(records)
    }

    fn page_records(&self, limit: usize, offset: usize) -> Result<Vec<TxRecord>, StoreError> {
        let cf = self.cf_handle(CF_RECORDS)?;
        self.db
            .iterator_cf(cf, IteratorMode::End)
            .skip(offset)
            .take(limit)
            .map(|item| {
                let (_, value_bytes) = item.map_err(|e| StoreError::Backend(e.to_string()))?;
                decode(&value_bytes)
            })
            .collect()
    }

    fn record_count(&self) -> Result<u64, StoreError> {
        self.get_meta_u64(META_RECORD_COUNT)
    }

    fn cursor(&self) -> Result<ChainCursor, StoreError> {
        let height = self.get_meta_u64(META_TIP_HEIGHT)?;
        let cf = self.cf_handle(CF_METADATA)?;
        let block_id = match self
            .db
            .get_cf(cf, META_TIP_HASH)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Hash256(fixed::<32>(&bytes, "tip hash")?),
            None => Hash256::ZERO,
        };
        Ok(ChainCursor::new(height, block_id))
    }

    fn block_id_at(&self, height: u64) -> Result<Option<Hash256>, StoreError> {
        let cf = self.cf_handle(CF_BLOCK_INDEX)?;
        self.db
            .get_cf(cf, Self::height_key(height))
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map(|bytes| fixed::<32>(&bytes, "block id").map(Hash256))
            .transpose()
    }

    fn commit(&mut self, batch: LedgerBatch) -> Result<(), StoreError> {
        let mut wb = WriteBatch::default();
        for op in &batch.ops {
            self.stage(&mut wb, op)?;
        }

        let cf_meta = self.cf_handle(CF_METADATA)?;
        wb.put_cf(cf_meta, META_TIP_HEIGHT, batch.cursor.height.to_le_bytes());
        wb.put_cf(cf_meta, META_TIP_HASH, batch.cursor.block_id.as_bytes());
        wb.put_cf(cf_meta, META_RECORD_COUNT, batch.record_count.to_le_bytes());
        wb.put_cf(cf_meta, META_OUTPUT_COUNT, batch.output_count.to_le_bytes());

        self.db
            .write(wb)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Codec(e.to_string()))
}

fn fixed<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N], StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("invalid {what} length: {}", bytes.len())))
}
