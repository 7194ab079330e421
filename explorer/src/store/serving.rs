//! Memory-mapped read-optimized store and its one-shot writer.

use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::table::{
    check_header, decode_index, encode_header, encode_index, Footer, PageBuilder, PageIter,
    PageRef, FOOTER_SIZE, HEADER_SIZE,
};
use super::traits::{Entry, KeyValueSink, KeyValueSource};
use super::{hex, StoreError, StoreStats};
use crate::config::SERVING_DATA_FILE;
use crate::hasher::PositionHash;
use crate::records::{
    move_prefix, position_key, uci_of_move_key, MoveStats, PositionStats, RecordKind,
};

/// Immutable sorted table, shared freely across threads.
pub struct ServingStore {
    mmap: Mmap,
    pages: Vec<PageRef>,
    footer: Footer,
    path: PathBuf,
}

impl std::fmt::Debug for ServingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServingStore")
            .field("path", &self.path)
            .field("pages", &self.pages.len())
            .field("entries", &self.footer.entry_count)
            .finish()
    }
}

impl ServingStore {
    /// Open the serving store in `dir`.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        Self::open_file(&dir.join(SERVING_DATA_FILE))
    }

    pub fn open_file(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_SIZE + FOOTER_SIZE {
            return Err(StoreError::Corrupt(format!("{} is too short", path.display())));
        }

        // SAFETY: the file is written once to a temp path and renamed into
        // place; nothing modifies it after that.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file)? };

        check_header(&mmap[..HEADER_SIZE])?;
        let footer = Footer::decode(&mmap[len - FOOTER_SIZE..])?;

        let index_start = usize::try_from(footer.index_offset)
            .map_err(|_| StoreError::Corrupt("index offset overflow".into()))?;
        let index_end = usize::try_from(footer.index_len)
            .ok()
            .and_then(|index_len| index_start.checked_add(index_len))
            .filter(|end| *end <= len - FOOTER_SIZE)
            .ok_or_else(|| StoreError::Corrupt("index out of bounds".into()))?;
        let index = &mmap[index_start..index_end];
        if crc32fast::hash(index) != footer.index_crc {
            return Err(StoreError::Corrupt("page index checksum mismatch".into()));
        }
        let pages = decode_index(index, footer.page_count)?;

        for page in &pages {
            let end = page.offset.saturating_add(u64::from(page.len));
            if page.offset < HEADER_SIZE as u64 || end > footer.index_offset {
                return Err(StoreError::Corrupt(format!(
                    "page at {} out of bounds",
                    page.offset
                )));
            }
        }

        tracing::debug!(
            path = %path.display(),
            pages = pages.len(),
            entries = footer.entry_count,
            "Opened serving store"
        );

        Ok(Self {
            mmap,
            pages,
            footer,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.footer.entry_count,
            positions: self.footer.position_count,
            moves: self.footer.move_count,
        }
    }

    /// Recompute every page checksum.
    pub fn verify_checksums(&self) -> Result<(), StoreError> {
        for (i, page) in self.pages.iter().enumerate() {
            if crc32fast::hash(self.page_bytes(i)) != page.crc {
                return Err(StoreError::Corrupt(format!(
                    "checksum mismatch in page {i} at offset {}",
                    page.offset
                )));
            }
        }
        Ok(())
    }

    fn page_bytes(&self, i: usize) -> &[u8] {
        let page = &self.pages[i];
        let start = page.offset as usize;
        &self.mmap[start..start + page.len as usize]
    }

    /// Index of the last page whose first key is `<= key`.
    fn page_for(&self, key: &[u8]) -> usize {
        self.pages
            .partition_point(|page| page.first_key.as_slice() <= key)
            .saturating_sub(1)
    }

    /// Entries in key order starting from the page that could hold `from`.
    fn cursor(&self, from: Option<&[u8]>) -> Cursor<'_> {
        Cursor {
            store: self,
            next_page: from.map_or(0, |key| self.page_for(key)),
            current: None,
        }
    }

    /// Zero-copy point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>, StoreError> {
        for entry in self.cursor(Some(key)) {
            let (k, v) = entry?;
            match k.cmp(key) {
                Ordering::Less => continue,
                Ordering::Equal => return Ok(Some(v)),
                Ordering::Greater => return Ok(None),
            }
        }
        Ok(None)
    }

    /// All entries whose key starts with `prefix`, ascending.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(&[u8], &[u8])>, StoreError> {
        let mut out = Vec::new();
        for entry in self.cursor(Some(prefix)) {
            let (k, v) = entry?;
            if k < prefix {
                continue;
            }
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k, v));
        }
        Ok(out)
    }

    pub fn get_position(&self, hash: PositionHash) -> Result<Option<PositionStats>, StoreError> {
        let key = position_key(hash);
        self.get(&key)?
            .map(|value| {
                PositionStats::decode(value).ok_or_else(|| StoreError::MalformedRecord(hex(&key)))
            })
            .transpose()
    }

    pub fn has_position(&self, hash: PositionHash) -> Result<bool, StoreError> {
        Ok(self.get(&position_key(hash))?.is_some())
    }

    /// Every move recorded for `hash`, ordered by UCI code.
    pub fn get_moves(&self, hash: PositionHash) -> Result<Vec<(String, MoveStats)>, StoreError> {
        self.scan_prefix(&move_prefix(hash))?
            .into_iter()
            .map(|(key, value)| {
                let uci = uci_of_move_key(key).ok_or_else(|| StoreError::MalformedRecord(hex(key)))?;
                let stats =
                    MoveStats::decode(value).ok_or_else(|| StoreError::MalformedRecord(hex(key)))?;
                Ok((uci.to_string(), stats))
            })
            .collect()
    }

    fn scan_after(&self, after: Option<&[u8]>, limit: usize) -> Result<Vec<Entry>, StoreError> {
        let mut out = Vec::with_capacity(limit.min(4096));
        for entry in self.cursor(after) {
            if out.len() >= limit {
                break;
            }
            let (k, v) = entry?;
            if after.is_some_and(|after| k <= after) {
                continue;
            }
            out.push((k.to_vec(), v.to_vec()));
        }
        Ok(out)
    }
}

struct Cursor<'a> {
    store: &'a ServingStore,
    next_page: usize,
    current: Option<PageIter<'a>>,
}

impl<'a> Iterator for Cursor<'a> {
    type Item = Result<(&'a [u8], &'a [u8]), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.current.as_mut().and_then(Iterator::next) {
                return Some(entry);
            }
            if self.next_page >= self.store.pages.len() {
                return None;
            }
            match PageIter::new(self.store.page_bytes(self.next_page)) {
                Ok(iter) => {
                    self.current = Some(iter);
                    self.next_page += 1;
                }
                Err(e) => {
                    self.next_page = usize::MAX;
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl KeyValueSource for ServingStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(ServingStore::get(self, key)?.map(<[u8]>::to_vec))
    }

    async fn scan(&self, after: Option<&[u8]>, limit: usize) -> Result<Vec<Entry>, StoreError> {
        self.scan_after(after, limit)
    }

    async fn entry_count(&self) -> Result<u64, StoreError> {
        Ok(self.footer.entry_count)
    }
}

/// Builds a serving store file. Used only by the compactor.
///
/// Entries are appended to a temp file; [`ServingStoreWriter::sync`] writes
/// the index and footer and renames the file into place. Dropping the
/// writer before `sync` removes the temp file.
pub struct ServingStoreWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    out: BufWriter<File>,
    offset: u64,
    page: PageBuilder,
    pages: Vec<PageRef>,
    last_key: Option<Vec<u8>>,
    footer: Footer,
    finished: bool,
}

impl ServingStoreWriter {
    /// Start a new store in `dir`; fails if one already exists there.
    pub fn create(dir: &Path) -> Result<Self, StoreError> {
        let final_path = dir.join(SERVING_DATA_FILE);
        if final_path.exists() {
            return Err(StoreError::AlreadyExists(final_path));
        }
        fs::create_dir_all(dir)?;

        let temp_path = dir.join(format!("{SERVING_DATA_FILE}.tmp"));
        let mut out = BufWriter::new(File::create(&temp_path)?);
        out.write_all(&encode_header())?;

        Ok(Self {
            temp_path,
            final_path,
            out,
            offset: HEADER_SIZE as u64,
            page: PageBuilder::new(),
            pages: Vec::new(),
            last_key: None,
            footer: Footer::default(),
            finished: false,
        })
    }

    /// Begin a batch of puts that is applied on [`ServingTransaction::commit`].
    pub fn transaction(&mut self) -> ServingTransaction<'_> {
        ServingTransaction {
            writer: self,
            staged: Vec::new(),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.footer.entry_count
    }

    fn check_order(last: Option<&[u8]>, key: &[u8]) -> Result<(), StoreError> {
        match last {
            Some(last) if key <= last => Err(StoreError::OutOfOrder),
            _ => Ok(()),
        }
    }

    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::ReadOnly);
        }
        Self::check_order(self.last_key.as_deref(), key)?;
        let kind = RecordKind::of_key(key).ok_or_else(|| StoreError::MalformedRecord(hex(key)))?;

        if self.page.would_overflow(key, value) {
            self.flush_page()?;
        }
        self.page.push(key, value)?;

        self.footer.entry_count += 1;
        match kind {
            RecordKind::Position => self.footer.position_count += 1,
            RecordKind::Move => self.footer.move_count += 1,
        }
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), StoreError> {
        if self.page.is_empty() {
            return Ok(());
        }
        let (bytes, first_key) = self.page.finish();
        let len = u32::try_from(bytes.len())
            .map_err(|_| StoreError::Corrupt("page larger than 4 GiB".into()))?;
        self.out.write_all(&bytes)?;
        self.pages.push(PageRef {
            offset: self.offset,
            len,
            crc: crc32fast::hash(&bytes),
            first_key,
        });
        self.offset += u64::from(len);
        Ok(())
    }

    /// Write the index and footer, fsync, and move the file into place.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        if self.finished {
            return Ok(());
        }
        self.flush_page()?;

        let index = encode_index(&self.pages);
        self.footer.index_offset = self.offset;
        self.footer.index_len = index.len() as u64;
        self.footer.page_count = self.pages.len() as u64;
        self.footer.index_crc = crc32fast::hash(&index);

        self.out.write_all(&index)?;
        self.out.write_all(&self.footer.encode())?;
        self.out.flush()?;
        self.out.get_ref().sync_all()?;

        fs::rename(&self.temp_path, &self.final_path)?;
        self.finished = true;

        tracing::info!(
            path = %self.final_path.display(),
            entries = self.footer.entry_count,
            pages = self.pages.len(),
            "Serving store written"
        );
        Ok(())
    }
}

impl Drop for ServingStoreWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

impl KeyValueSink for ServingStoreWriter {
    async fn write_batch(&mut self, entries: &[Entry]) -> Result<(), StoreError> {
        let mut tx = self.transaction();
        for (key, value) in entries {
            tx.put_raw(key, value)?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn sync(&mut self) -> Result<(), StoreError> {
        ServingStoreWriter::sync(self)
    }
}

/// Staged puts; dropped without `commit` they are discarded.
pub struct ServingTransaction<'a> {
    writer: &'a mut ServingStoreWriter,
    staged: Vec<Entry>,
}

impl ServingTransaction<'_> {
    pub fn put_raw(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let last = self
            .staged
            .last()
            .map(|(k, _)| k.as_slice())
            .or(self.writer.last_key.as_deref());
        ServingStoreWriter::check_order(last, key)?;
        self.staged.push((key.to_vec(), value.to_vec()));
        Ok(())
    }

    /// Append the staged entries; returns how many were written.
    pub fn commit(mut self) -> Result<usize, StoreError> {
        let count = self.staged.len();
        for (key, value) in std::mem::take(&mut self.staged) {
            self.writer.append(&key, &value)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::move_key;

    fn hash(n: u8) -> PositionHash {
        PositionHash::from_bytes([n; 16])
    }

    fn write_store(dir: &Path, positions: u8, moves_per_position: usize) {
        let mut entries: Vec<Entry> = Vec::new();
        for n in 0..positions {
            let stats = PositionStats {
                white: u64::from(n),
                draws: 1,
                black: 2,
            };
            entries.push((position_key(hash(n)), stats.encode().to_vec()));
        }
        for n in 0..positions {
            for m in 0..moves_per_position {
                let uci = format!("a{}b{}", m % 8 + 1, m / 8 + 1);
                let stats = MoveStats {
                    white: m as u64,
                    ..MoveStats::default()
                };
                entries.push((move_key(hash(n), &uci), stats.encode().to_vec()));
            }
        }
        entries.sort();

        let mut writer = ServingStoreWriter::create(dir).unwrap();
        for chunk in entries.chunks(100) {
            let mut tx = writer.transaction();
            for (k, v) in chunk {
                tx.put_raw(k, v).unwrap();
            }
            tx.commit().unwrap();
        }
        writer.sync().unwrap();
    }

    #[test]
    fn test_write_then_read_across_many_pages() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 200, 6);

        let store = ServingStore::open(dir.path()).unwrap();
        assert_eq!(
            store.stats(),
            StoreStats {
                entries: 1400,
                positions: 200,
                moves: 1200
            }
        );
        assert!(store.pages.len() > 1);
        store.verify_checksums().unwrap();

        let position = store.get_position(hash(150)).unwrap().unwrap();
        assert_eq!(position, PositionStats { white: 150, draws: 1, black: 2 });
        assert!(store.has_position(hash(0)).unwrap());
        assert!(!store.has_position(hash(250)).unwrap());

        let moves = store.get_moves(hash(199)).unwrap();
        assert_eq!(moves.len(), 6);
        assert!(moves.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(store.get_moves(hash(230)).unwrap().is_empty());
    }

    #[test]
    fn test_out_of_order_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ServingStoreWriter::create(dir.path()).unwrap();
        let mut tx = writer.transaction();
        tx.put_raw(&position_key(hash(2)), &[0u8; 24]).unwrap();
        assert!(matches!(
            tx.put_raw(&position_key(hash(1)), &[0u8; 24]),
            Err(StoreError::OutOfOrder)
        ));
        assert!(matches!(
            tx.put_raw(&position_key(hash(2)), &[0u8; 24]),
            Err(StoreError::OutOfOrder)
        ));
        tx.commit().unwrap();

        let mut tx = writer.transaction();
        assert!(matches!(
            tx.put_raw(&position_key(hash(1)), &[0u8; 24]),
            Err(StoreError::OutOfOrder)
        ));
    }

    #[test]
    fn test_existing_target_refused_and_unsynced_writer_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut writer = ServingStoreWriter::create(dir.path()).unwrap();
            let mut tx = writer.transaction();
            tx.put_raw(&position_key(hash(1)), &[0u8; 24]).unwrap();
            tx.commit().unwrap();
        }
        assert!(!dir.path().join(format!("{SERVING_DATA_FILE}.tmp")).exists());
        assert!(matches!(ServingStore::open(dir.path()), Err(StoreError::NotFound(_))));

        write_store(dir.path(), 1, 1);
        assert!(matches!(
            ServingStoreWriter::create(dir.path()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_empty_store_and_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ServingStoreWriter::create(dir.path()).unwrap();
        writer.sync().unwrap();
        drop(writer);

        let store = ServingStore::open(dir.path()).unwrap();
        assert_eq!(store.stats(), StoreStats::default());
        assert!(store.get(&position_key(hash(1))).unwrap().is_none());
        drop(store);

        let path = dir.path().join(SERVING_DATA_FILE);
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] = b'X';
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(ServingStore::open(dir.path()), Err(StoreError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_scan_after_pages_through_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_store(dir.path(), 50, 3);
        let store = ServingStore::open(dir.path()).unwrap();

        let mut after: Option<Vec<u8>> = None;
        let mut total = 0;
        loop {
            let page = KeyValueSource::scan(&store, after.as_deref(), 17).await.unwrap();
            if page.is_empty() {
                break;
            }
            total += page.len();
            after = page.last().map(|(k, _)| k.clone());
        }
        assert_eq!(total as u64, store.entry_count().await.unwrap());
    }
}
