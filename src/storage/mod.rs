//! Block-structured in-memory relation storage.
//!
//! Each storage object is an append-only sequence of checksummed blocks.
//! The manager is a persistent map so a transaction can snapshot it by
//! cloning and restore it on abort.

use crate::catalog::schema::Persistence;
use crate::catalog::types::{Oid, Value};
use crate::error::AlterError;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

pub type StorageId = u64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tuple {
    /// Per-row object identifier, present only for relations with OIDs.
    pub oid: Option<Oid>,
    /// Physical values by attribute position. Rows written before a column
    /// was added are shorter than the current descriptor.
    pub values: Vec<Value>,
}

impl Tuple {
    pub fn new(values: Vec<Value>) -> Self {
        Self { oid: None, values }
    }
}

#[derive(Debug, Clone)]
struct Block {
    tuples: Vec<Tuple>,
    checksum: u32,
}

impl Block {
    fn seal(tuples: Vec<Tuple>) -> Result<Self, AlterError> {
        let checksum = block_checksum(&tuples)?;
        Ok(Self { tuples, checksum })
    }

    fn verify(&self, storage: StorageId, blkno: usize) -> Result<(), AlterError> {
        if block_checksum(&self.tuples)? != self.checksum {
            return Err(AlterError::internal(format!(
                "invalid page checksum in block {blkno} of storage {storage}"
            )));
        }
        Ok(())
    }
}

fn block_checksum(tuples: &[Tuple]) -> Result<u32, AlterError> {
    let bytes = rmp_serde::to_vec(tuples).map_err(|e| AlterError::internal(e.to_string()))?;
    Ok(crc32c::crc32c(&bytes))
}

#[derive(Debug, Clone)]
pub struct StorageFile {
    pub tablespace: CompactString,
    pub persistence: Persistence,
    blocks: im::Vector<Block>,
    synced: bool,
}

#[derive(Debug, Clone)]
pub struct StorageManager {
    files: im::HashMap<StorageId, StorageFile>,
    next_id: StorageId,
    next_row_oid: Oid,
    rows_per_block: usize,
}

impl StorageManager {
    pub fn new(rows_per_block: usize) -> Self {
        Self {
            files: im::HashMap::new(),
            next_id: 1,
            next_row_oid: 1,
            rows_per_block: rows_per_block.max(1),
        }
    }

    pub fn create(&mut self, tablespace: &str, persistence: Persistence) -> StorageId {
        let id = self.next_id;
        self.next_id += 1;
        self.files.insert(
            id,
            StorageFile {
                tablespace: tablespace.into(),
                persistence,
                blocks: im::Vector::new(),
                synced: false,
            },
        );
        id
    }

    pub fn exists(&self, id: StorageId) -> bool {
        self.files.contains_key(&id)
    }

    fn file(&self, id: StorageId) -> Result<&StorageFile, AlterError> {
        self.files
            .get(&id)
            .ok_or_else(|| AlterError::internal(format!("could not open storage {id}")))
    }

    fn file_mut(&mut self, id: StorageId) -> Result<&mut StorageFile, AlterError> {
        self.files
            .get_mut(&id)
            .ok_or_else(|| AlterError::internal(format!("could not open storage {id}")))
    }

    pub fn tablespace(&self, id: StorageId) -> Result<&str, AlterError> {
        Ok(self.file(id)?.tablespace.as_str())
    }

    pub fn persistence(&self, id: StorageId) -> Result<Persistence, AlterError> {
        Ok(self.file(id)?.persistence)
    }

    pub fn append(&mut self, id: StorageId, tuple: Tuple) -> Result<(), AlterError> {
        let rows_per_block = self.rows_per_block;
        let file = self.file_mut(id)?;
        file.synced = false;
        match file.blocks.back() {
            Some(last) if last.tuples.len() < rows_per_block => {
                let mut tuples = last.tuples.clone();
                tuples.push(tuple);
                let sealed = Block::seal(tuples)?;
                let last_idx = file.blocks.len() - 1;
                file.blocks.set(last_idx, sealed);
            }
            _ => file.blocks.push_back(Block::seal(vec![tuple])?),
        }
        Ok(())
    }

    pub fn append_all(
        &mut self,
        id: StorageId,
        tuples: impl IntoIterator<Item = Tuple>,
    ) -> Result<(), AlterError> {
        for tuple in tuples {
            self.append(id, tuple)?;
        }
        Ok(())
    }

    /// All tuples in physical order, verifying each block on the way.
    pub fn tuples(&self, id: StorageId) -> Result<Vec<Tuple>, AlterError> {
        let file = self.file(id)?;
        let mut out = Vec::new();
        for (blkno, block) in file.blocks.iter().enumerate() {
            block.verify(id, blkno)?;
            out.extend(block.tuples.iter().cloned());
        }
        Ok(out)
    }

    pub fn row_count(&self, id: StorageId) -> Result<usize, AlterError> {
        Ok(self.file(id)?.blocks.iter().map(|b| b.tuples.len()).sum())
    }

    pub fn nblocks(&self, id: StorageId) -> Result<usize, AlterError> {
        Ok(self.file(id)?.blocks.len())
    }

    /// Copies blocks `start..end` of `src` onto the end of `dst` without
    /// interpreting their contents.
    pub fn copy_block_range(
        &mut self,
        src: StorageId,
        dst: StorageId,
        start: usize,
        end: usize,
    ) -> Result<usize, AlterError> {
        let source = self.file(src)?;
        if end > source.blocks.len() || start > end {
            return Err(AlterError::internal(format!(
                "block range {start}..{end} out of bounds for storage {src}"
            )));
        }
        let mut copied = Vec::with_capacity(end - start);
        for blkno in start..end {
            let block = &source.blocks[blkno];
            block.verify(src, blkno)?;
            copied.push(block.clone());
        }
        let target = self.file_mut(dst)?;
        target.synced = false;
        let count = copied.len();
        target.blocks.extend(copied);
        Ok(count)
    }

    pub fn fsync(&mut self, id: StorageId) -> Result<(), AlterError> {
        self.file_mut(id)?.synced = true;
        Ok(())
    }

    pub fn is_synced(&self, id: StorageId) -> Result<bool, AlterError> {
        Ok(self.file(id)?.synced)
    }

    pub fn truncate(&mut self, id: StorageId) -> Result<(), AlterError> {
        let file = self.file_mut(id)?;
        file.blocks = im::Vector::new();
        file.synced = false;
        Ok(())
    }

    /// Removes the storage object; returns whether it existed.
    pub fn unlink(&mut self, id: StorageId) -> bool {
        self.files.remove(&id).is_some()
    }

    pub fn alloc_row_oid(&mut self) -> Oid {
        let oid = self.next_row_oid;
        self.next_row_oid += 1;
        oid
    }

    pub fn storage_count(&self) -> usize {
        self.files.len()
    }

    #[cfg(test)]
    pub(crate) fn corrupt_block(&mut self, id: StorageId, blkno: usize) {
        if let Some(file) = self.files.get_mut(&id)
            && let Some(block) = file.blocks.get_mut(blkno)
        {
            block.checksum ^= 0xdead_beef;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: i64) -> Tuple {
        Tuple::new(vec![Value::Integer(v)])
    }

    #[test]
    fn appends_fill_blocks_in_order() {
        let mut sm = StorageManager::new(2);
        let id = sm.create("pg_default", Persistence::Permanent);
        sm.append_all(id, (0..5).map(row)).expect("append");
        assert_eq!(sm.nblocks(id).expect("nblocks"), 3);
        let values: Vec<_> = sm
            .tuples(id)
            .expect("scan")
            .into_iter()
            .map(|t| t.values[0].clone())
            .collect();
        assert_eq!(values, (0..5).map(Value::Integer).collect::<Vec<_>>());
    }

    #[test]
    fn block_copy_preserves_contents_and_verifies_checksums() {
        let mut sm = StorageManager::new(2);
        let src = sm.create("pg_default", Persistence::Permanent);
        sm.append_all(src, (0..4).map(row)).expect("append");
        let dst = sm.create("fast", Persistence::Permanent);
        assert_eq!(sm.copy_block_range(src, dst, 0, 2).expect("copy"), 2);
        assert_eq!(sm.tuples(dst).expect("scan"), sm.tuples(src).expect("scan"));
        assert_eq!(sm.tablespace(dst).expect("ts"), "fast");

        sm.corrupt_block(src, 1);
        let other = sm.create("fast", Persistence::Permanent);
        assert!(sm.copy_block_range(src, other, 0, 2).is_err());
    }

    #[test]
    fn snapshots_are_independent() {
        let mut sm = StorageManager::new(8);
        let id = sm.create("pg_default", Persistence::Permanent);
        sm.append(id, row(1)).expect("append");
        let snapshot = sm.clone();
        sm.append(id, row(2)).expect("append");
        assert_eq!(snapshot.row_count(id).expect("count"), 1);
        assert_eq!(sm.row_count(id).expect("count"), 2);
    }
}
