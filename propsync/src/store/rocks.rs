//! RocksDB-backed version store.
//!
//! Column families:
//! - `applications`: Application rows (bincode, keyed by name)
//! - `hosts`: Host rows (bincode, keyed by name)
//! - `properties`: Current record per identity, LZ4-compressed bincode,
//!   keyed by `application \0 host \0 property`
//! - `requests`: Idempotency receipts (bincode, keyed by request id bytes)
//!
//! Every mutation is a single `WriteBatch`: the record, the application's
//! new `last_version` and the request receipt become durable together or
//! not at all.

use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{
    validate_id, validate_name, Committed, PropertyMutation, Rejection, StoreError, VersionStore,
};
use crate::model::{
    Application, Host, MutationReceipt, PropertyId, PropertyRecord, RequestId, Version,
};

const CF_APPLICATIONS: &str = "applications";
const CF_HOSTS: &str = "hosts";
const CF_PROPERTIES: &str = "properties";
const CF_REQUESTS: &str = "requests";

const COLUMN_FAMILIES: &[&str] = &[CF_APPLICATIONS, CF_HOSTS, CF_PROPERTIES, CF_REQUESTS];

/// Key separator inside `properties` keys. Names never contain it.
const SEP: u8 = 0;

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every commit (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("propsync_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Version store persisted in RocksDB.
///
/// Commits are serialized by one lock: version allocation reads the
/// application row, so a read-modify-write must not interleave.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    commit_lock: Mutex<()>,
}

impl RocksStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened property store at {}", config.path.display());
        Ok(Self {
            db,
            config,
            commit_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_PROPERTIES => {
                // Values are LZ4-compressed before they reach RocksDB.
                opts.set_compression_type(DBCompressionType::None);
                opts.set_max_write_buffer_number(4);
            }
            CF_REQUESTS => {
                // Append-mostly, point lookups on replay.
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.set_max_write_buffer_number(2);
            }
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Commit path ──────────────────────────────────────────────────

    fn replay(&self, request_id: &RequestId) -> Result<Option<Committed>, StoreError> {
        let cf = self.cf(CF_REQUESTS)?;
        match self.db.get_cf(cf, request_id.as_bytes())? {
            Some(bytes) => {
                log::debug!("Replaying committed request {request_id}");
                Ok(Some(Committed::replayed(decode(&bytes)?)))
            }
            None => Ok(None),
        }
    }

    fn commit(&self, mut batch: WriteBatch, request_id: RequestId, receipt: &MutationReceipt)
        -> Result<(), StoreError>
    {
        batch.put_cf(self.cf(CF_REQUESTS)?, request_id.as_bytes(), encode(receipt)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn mutate_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        mutation: PropertyMutation,
    ) -> Result<Committed, StoreError> {
        validate_id(id)?;
        let _commit = self.commit_lock.lock();

        if let Some(done) = self.replay(&request_id)? {
            return Ok(done);
        }

        let mut application = self
            .application(&id.application)?
            .ok_or_else(|| Rejection::ApplicationNotFound {
                application: id.application.clone(),
            })?;
        if self.get::<Host>(CF_HOSTS, id.host.as_bytes())?.is_none() {
            return Err(Rejection::HostNotFound {
                host: id.host.clone(),
            }
            .into());
        }

        mutation.check(id, self.read_property(id)?.as_ref())?;

        let version = application.allocate_version();
        let record = mutation.into_record(id.clone(), version);

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_PROPERTIES)?,
            property_key(id),
            lz4_flex::compress_prepend_size(&encode(&record)?),
        );
        batch.put_cf(
            self.cf(CF_APPLICATIONS)?,
            application.name.as_bytes(),
            encode(&application)?,
        );

        let receipt = MutationReceipt::PropertyChanged { record };
        self.commit(batch, request_id, &receipt)?;

        log::debug!("Committed {id} at version {version}");
        Ok(Committed::fresh(receipt))
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>, StoreError> {
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(self.cf(cf)?, IteratorMode::Start) {
            let (_, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }
}

impl VersionStore for RocksStore {
    fn create_application(
        &self,
        request_id: RequestId,
        name: &str,
    ) -> Result<Committed, StoreError> {
        validate_name(name)?;
        let _commit = self.commit_lock.lock();

        if let Some(done) = self.replay(&request_id)? {
            return Ok(done);
        }
        if self.application(name)?.is_some() {
            return Err(Rejection::ApplicationAlreadyExists {
                application: name.into(),
            }
            .into());
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(
            self.cf(CF_APPLICATIONS)?,
            name.as_bytes(),
            encode(&Application::new(name))?,
        );
        let receipt = MutationReceipt::ApplicationCreated {
            application: name.into(),
        };
        self.commit(batch, request_id, &receipt)?;

        log::info!("Created application {name}");
        Ok(Committed::fresh(receipt))
    }

    fn create_host(&self, request_id: RequestId, name: &str) -> Result<Committed, StoreError> {
        validate_name(name)?;
        let _commit = self.commit_lock.lock();

        if let Some(done) = self.replay(&request_id)? {
            return Ok(done);
        }
        if self.get::<Host>(CF_HOSTS, name.as_bytes())?.is_some() {
            return Err(Rejection::HostAlreadyExists { host: name.into() }.into());
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_HOSTS)?, name.as_bytes(), encode(&Host::new(name))?);
        let receipt = MutationReceipt::HostCreated { host: name.into() };
        self.commit(batch, request_id, &receipt)?;

        log::info!("Created host {name}");
        Ok(Committed::fresh(receipt))
    }

    fn update_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        value: &str,
        expected: Option<Version>,
    ) -> Result<Committed, StoreError> {
        let mutation = PropertyMutation::Update {
            value: value.to_owned(),
            expected,
        };
        self.mutate_property(request_id, id, mutation)
    }

    fn delete_property(
        &self,
        request_id: RequestId,
        id: &PropertyId,
        expected: Version,
    ) -> Result<Committed, StoreError> {
        self.mutate_property(request_id, id, PropertyMutation::Delete { expected })
    }

    fn read_property(&self, id: &PropertyId) -> Result<Option<PropertyRecord>, StoreError> {
        match self.db.get_cf(self.cf(CF_PROPERTIES)?, property_key(id))? {
            Some(compressed) => Ok(Some(decode_compressed(&compressed)?)),
            None => Ok(None),
        }
    }

    fn application(&self, name: &str) -> Result<Option<Application>, StoreError> {
        self.get(CF_APPLICATIONS, name.as_bytes())
    }

    fn list_applications(&self) -> Result<Vec<Application>, StoreError> {
        self.scan(CF_APPLICATIONS)
    }

    fn list_hosts(&self) -> Result<Vec<Host>, StoreError> {
        self.scan(CF_HOSTS)
    }

    fn list_properties(&self, application: &str) -> Result<Vec<PropertyRecord>, StoreError> {
        if self.application(application)?.is_none() {
            return Err(Rejection::ApplicationNotFound {
                application: application.into(),
            }
            .into());
        }

        let prefix = application_prefix(application);
        let iter = self.db.iterator_cf(
            self.cf(CF_PROPERTIES)?,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let record: PropertyRecord = decode_compressed(&value)?;
            if record.is_live() {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// `application \0 host \0 property`, sorting by host then property.
fn property_key(id: &PropertyId) -> Vec<u8> {
    let mut key = application_prefix(&id.application);
    key.extend_from_slice(id.host.as_bytes());
    key.push(SEP);
    key.extend_from_slice(id.property.as_bytes());
    key
}

fn application_prefix(application: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(application.len() + 1);
    prefix.extend_from_slice(application.as_bytes());
    prefix.push(SEP);
    prefix
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

fn decode_compressed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::Compression(e.to_string()))?;
    decode(&raw)
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
