use std::fs::File;
use std::io::Read;

use sdb_types::{PageId, StoreFiles};
use tracing::{debug, info, instrument, warn};

use crate::blob::{self, BlobFileHeader, BlobRef};
use crate::error::{PagerError, PagerResult};
use crate::header::{slot_offset, Header, StoreLayout, MIN_BLOB_PAGE_SIZE, MIN_INDEX_PAGE_SIZE};
use crate::lock;
use crate::page_file::{PageFile, SyncMode};

/// The page store of one open store: index file, blob file, and the
/// committed header that ties them together.
///
/// Node pages and blob chains allocated through the pager stay invisible to
/// readers of the files until [`commit`](Pager::commit) writes a new header.
#[derive(Debug)]
pub struct Pager {
    index: PageFile,
    blobs: PageFile,
    header: Header,
    slot: usize,
}

impl Pager {
    /// Create both backing files for an empty store.
    ///
    /// Fails if either file already exists. On failure no file is left
    /// behind.
    #[instrument(skip(files), fields(index = %files.index.display()))]
    pub fn create(files: &StoreFiles, layout: StoreLayout, sync_mode: SyncMode) -> PagerResult<Self> {
        layout.validate()?;

        let blob_meta = BlobFileHeader::new(layout.blob_page_size).encode()?;
        let blobs = PageFile::create(
            &files.blob,
            layout.blob_page_size as usize,
            &blob_meta,
            sync_mode,
        )?;

        let header = Header::new(layout);
        let created = header.encode().and_then(|meta| {
            PageFile::create(&files.index, layout.page_size as usize, &meta, sync_mode)
        });
        let index = match created {
            Ok(index) => index,
            Err(e) => {
                drop(blobs);
                let _ = std::fs::remove_file(&files.blob);
                return Err(e);
            }
        };

        info!(
            page_size = layout.page_size,
            blob_page_size = layout.blob_page_size,
            "created store files"
        );
        Ok(Self {
            index,
            blobs,
            header,
            slot: 0,
        })
    }

    /// Remove a blob file that has no index file next to it.
    ///
    /// [`create`](Pager::create) writes the blob file first and the index
    /// file holds every header, so a crash in between leaves a blob file no
    /// header refers to. The file is removed only if no handle holds it and
    /// it starts with a valid blob-file header.
    #[instrument(skip(files), fields(blob = %files.blob.display()))]
    pub fn remove_orphan_blob(files: &StoreFiles) -> PagerResult<()> {
        if files.index.exists() {
            return Err(PagerError::Corrupt(format!(
                "{} is not an orphan: index file exists",
                files.blob.display()
            )));
        }

        let file = lock::open_locked(&files.blob)?;
        BlobFileHeader::decode_any(&read_prefix(&file, MIN_BLOB_PAGE_SIZE)?)?;
        drop(file);

        std::fs::remove_file(&files.blob)?;
        warn!("removed blob file left by an interrupted create");
        Ok(())
    }

    /// Open and lock both backing files of an existing store.
    #[instrument(skip(files), fields(index = %files.index.display()))]
    pub fn open(files: &StoreFiles, sync_mode: SyncMode) -> PagerResult<Self> {
        let index_file = lock::open_locked(&files.index)?;
        let blob_file = lock::open_locked(&files.blob)?;

        let (header, slot) = Header::select(&read_prefix(&index_file, MIN_INDEX_PAGE_SIZE)?)?;
        let layout = header.layout;

        let blob_page0 = read_prefix(&blob_file, layout.blob_page_size as usize)?;
        BlobFileHeader::decode(&blob_page0, layout.blob_page_size)?;

        let index = PageFile::attach(
            index_file,
            &files.index,
            layout.page_size as usize,
            header.index,
            sync_mode,
        )?;
        let blobs = PageFile::attach(
            blob_file,
            &files.blob,
            layout.blob_page_size as usize,
            header.blobs,
            sync_mode,
        )?;

        if !header.root.is_null() && header.root.get() >= header.index.page_count {
            return Err(PagerError::Corrupt(format!(
                "root {} beyond index page count {}",
                header.root, header.index.page_count
            )));
        }

        info!(
            generation = header.generation,
            entries = header.entry_count,
            "opened store files"
        );
        Ok(Self {
            index,
            blobs,
            header,
            slot,
        })
    }

    /// The last committed header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Geometry fixed at creation.
    pub fn layout(&self) -> StoreLayout {
        self.header.layout
    }

    // ------------------------------------------------------------------
    // Node pages
    // ------------------------------------------------------------------

    pub fn allocate_node(&mut self) -> PageId {
        self.index.allocate()
    }

    pub fn read_node(&self, page: PageId) -> PagerResult<Vec<u8>> {
        self.index.read(page)
    }

    pub fn write_node(&mut self, page: PageId, bytes: Vec<u8>) -> PagerResult<()> {
        self.index.write(page, bytes)
    }

    pub fn free_node(&mut self, page: PageId) -> PagerResult<()> {
        self.index.free(page)
    }

    /// Returns `true` if `page` was allocated since the last commit and may be
    /// rewritten in place.
    pub fn is_fresh_node(&self, page: PageId) -> bool {
        self.index.is_fresh(page)
    }

    // ------------------------------------------------------------------
    // Blobs
    // ------------------------------------------------------------------

    pub fn write_blob(&mut self, bytes: &[u8]) -> PagerResult<BlobRef> {
        blob::write_blob(&mut self.blobs, bytes)
    }

    pub fn read_blob(&self, blob: BlobRef) -> PagerResult<Vec<u8>> {
        blob::read_blob(&self.blobs, blob)
    }

    pub fn free_blob(&mut self, blob: BlobRef) -> PagerResult<()> {
        blob::free_blob(&mut self.blobs, blob)
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    /// Returns `true` if anything changed since the last commit.
    pub fn has_changes(&self) -> bool {
        self.index.has_changes() || self.blobs.has_changes()
    }

    /// Make all changes since the last commit durable under a new header.
    ///
    /// Page data of both files is flushed before the header is written to the
    /// alternate slot. On error every change since the last commit is rolled
    /// back and the previous header stays authoritative.
    pub fn commit(&mut self, root: PageId, entry_count: u64) -> PagerResult<()> {
        if !self.has_changes() && root == self.header.root && entry_count == self.header.entry_count {
            return Ok(());
        }

        match self.write_commit(root, entry_count) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn write_commit(&mut self, root: PageId, entry_count: u64) -> PagerResult<()> {
        let blobs = self.blobs.prepare_commit()?;
        let index = self.index.prepare_commit()?;
        self.blobs.flush()?;
        self.index.flush()?;

        let header = Header {
            generation: self.header.generation + 1,
            root,
            entry_count,
            index,
            blobs,
            ..self.header
        };
        let slot = 1 - self.slot;
        self.index.write_meta(slot_offset(slot), &header.encode()?)?;

        self.blobs.finish_commit();
        self.index.finish_commit();
        self.header = header;
        self.slot = slot;

        debug!(
            generation = header.generation,
            slot,
            root = %header.root,
            entries = entry_count,
            "committed header"
        );
        Ok(())
    }

    /// Discard every change since the last commit.
    pub fn abort(&mut self) {
        self.index.rollback();
        self.blobs.rollback();
    }

    /// Discard pending changes and release both files.
    pub fn close(self) -> PagerResult<()> {
        let index = self.index.close();
        let blobs = self.blobs.close();
        index.and(blobs)
    }
}

/// Read up to `len` bytes from the start of `file`, zero-padding a short file.
fn read_prefix(file: &File, len: usize) -> PagerResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    let mut f = file;
    f.take(len as u64).read_to_end(&mut buf)?;
    if buf.is_empty() {
        return Err(PagerError::Corrupt("backing file is empty".into()));
    }
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> StoreLayout {
        StoreLayout {
            page_size: 1024,
            blob_page_size: 512,
            order: 8,
            inline_limit: 64,
        }
    }

    fn files(dir: &std::path::Path) -> StoreFiles {
        StoreFiles::new(dir, "pager")
    }

    #[test]
    fn create_then_open_empty() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
        assert!(pager.header().root.is_null());
        pager.close().unwrap();

        let pager = Pager::open(&f, SyncMode::EveryCommit).unwrap();
        assert_eq!(pager.header().generation, 1);
        assert_eq!(pager.layout(), layout());
        assert_eq!(pager.header().entry_count, 0);
    }

    #[test]
    fn create_refuses_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        std::fs::write(&f.index, b"occupied").unwrap();

        assert!(Pager::create(&f, layout(), SyncMode::EveryCommit).is_err());
        assert!(!f.blob.exists(), "blob file left behind");
        assert_eq!(std::fs::read(&f.index).unwrap(), b"occupied");
    }

    #[test]
    fn open_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let _pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
        assert!(matches!(
            Pager::open(&f, SyncMode::EveryCommit),
            Err(PagerError::Locked(_))
        ));
    }

    #[test]
    fn commit_persists_nodes_and_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let mut pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();

        let node = pager.allocate_node();
        pager.write_node(node, b"node bytes".to_vec()).unwrap();
        let big = vec![7u8; 3000];
        let blob = pager.write_blob(&big).unwrap();
        pager.commit(node, 1).unwrap();
        assert_eq!(pager.header().generation, 2);
        pager.close().unwrap();

        let pager = Pager::open(&f, SyncMode::EveryCommit).unwrap();
        assert_eq!(pager.header().root, node);
        assert_eq!(pager.header().entry_count, 1);
        assert_eq!(&pager.read_node(node).unwrap()[..10], b"node bytes");
        assert_eq!(pager.read_blob(blob).unwrap(), big);
    }

    #[test]
    fn uncommitted_changes_vanish_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let mut pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
        let node = pager.allocate_node();
        pager.write_node(node, b"kept".to_vec()).unwrap();
        pager.commit(node, 1).unwrap();

        let other = pager.allocate_node();
        pager.write_node(other, b"lost".to_vec()).unwrap();
        pager.close().unwrap();

        let pager = Pager::open(&f, SyncMode::EveryCommit).unwrap();
        assert_eq!(pager.header().root, node);
        assert_eq!(pager.header().index.page_count, 2);
    }

    #[test]
    fn empty_commit_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let mut pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
        pager.commit(PageId::NULL, 0).unwrap();
        assert_eq!(pager.header().generation, 1);
    }

    #[test]
    fn header_slots_alternate() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let mut pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();

        for n in 1..=3u64 {
            let node = pager.allocate_node();
            pager.write_node(node, vec![n as u8]).unwrap();
            pager.commit(node, n).unwrap();
        }
        assert_eq!(pager.header().generation, 4);
        assert_eq!(pager.slot, 1);
        pager.close().unwrap();

        let pager = Pager::open(&f, SyncMode::OsDefault).unwrap();
        assert_eq!(pager.header().generation, 4);
        assert_eq!(pager.header().entry_count, 3);
    }

    #[test]
    fn abort_discards_allocations() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        let mut pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
        let node = pager.allocate_node();
        pager.write_node(node, vec![1]).unwrap();
        pager.write_blob(b"blob").unwrap();
        assert!(pager.has_changes());

        pager.abort();
        assert!(!pager.has_changes());
        assert_eq!(pager.allocate_node(), node);
    }

    #[test]
    fn mismatched_blob_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        Pager::create(&f, layout(), SyncMode::EveryCommit)
            .unwrap()
            .close()
            .unwrap();
        std::fs::write(&f.blob, vec![0u8; 512]).unwrap();

        assert!(matches!(
            Pager::open(&f, SyncMode::EveryCommit),
            Err(PagerError::Corrupt(_))
        ));
    }

    #[test]
    fn orphan_blob_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        Pager::create(&f, layout(), SyncMode::EveryCommit)
            .unwrap()
            .close()
            .unwrap();
        std::fs::remove_file(&f.index).unwrap();

        Pager::remove_orphan_blob(&f).unwrap();
        assert!(!f.blob.exists());
        Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
    }

    #[test]
    fn foreign_or_paired_blob_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let f = files(dir.path());
        std::fs::write(&f.blob, b"someone else's data").unwrap();
        assert!(matches!(
            Pager::remove_orphan_blob(&f),
            Err(PagerError::Corrupt(_))
        ));
        assert!(f.blob.exists());
        std::fs::remove_file(&f.blob).unwrap();

        let _pager = Pager::create(&f, layout(), SyncMode::EveryCommit).unwrap();
        assert!(Pager::remove_orphan_blob(&f).is_err());
        assert!(f.blob.exists());
    }
}
