//! Fixed-size page allocation over a single backing file.
//!
//! Page 0 is reserved for file metadata. All other pages are either reachable
//! from the committed header, on the free list, or allocated by the open
//! transaction. Writes are buffered until [`PageFile::flush`]; a page that is
//! reachable from the committed header is never overwritten, so a crash before
//! the next header write always leaves the previous state intact.
//!
//! # Free list
//!
//! The free list is persisted as a chain of *trunk* pages, each a framed
//! `{next, ids}` record. It is rewritten on every commit into pages that are
//! already free under the old header (or appended to the file), never into
//! pages the old header can still reach.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sdb_types::PageId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PagerError, PagerResult};
use crate::frame::{decode_framed, encode_framed, FRAME_HEADER_SIZE};
use crate::lock;

/// Flush strategy at commit time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` page and header writes at every commit (durable).
    #[default]
    EveryCommit,
    /// Hand writes to the OS page cache only (fast, not crash-durable).
    OsDefault,
}

/// Allocation state of one file as recorded in the header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileState {
    /// Number of pages in the file, including reserved page 0.
    pub page_count: u64,
    /// First trunk page of the free list (null when empty).
    pub free_head: PageId,
    /// Number of page ids recorded on the free list.
    pub free_len: u64,
}

impl FileState {
    /// State of a freshly created file: only page 0.
    pub fn empty() -> Self {
        Self {
            page_count: 1,
            free_head: PageId::NULL,
            free_len: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Allocation {
    page_count: u64,
    free: Vec<PageId>,
    trunk: Vec<PageId>,
}

#[derive(Serialize, Deserialize)]
struct TrunkPage {
    next: PageId,
    ids: Vec<PageId>,
}

/// Bytes of bincode overhead in a trunk page: `next` + vector length.
const TRUNK_OVERHEAD: usize = 16;

/// Page allocator and buffered page I/O for one backing file.
pub struct PageFile {
    file: File,
    path: PathBuf,
    page_size: usize,
    sync_mode: SyncMode,
    /// Allocation state including the open transaction.
    current: Allocation,
    /// Allocation state as of the last durable header.
    committed: Allocation,
    /// Committed pages freed by the open transaction; reusable after commit.
    released: Vec<PageId>,
    /// Pages allocated by the open transaction.
    fresh: HashSet<PageId>,
    /// Buffered page images awaiting flush.
    dirty: BTreeMap<PageId, Vec<u8>>,
}

impl std::fmt::Debug for PageFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFile")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("page_count", &self.current.page_count)
            .field("free", &self.current.free.len())
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

impl PageFile {
    /// Create a new file (failing if it exists), lock it, and write `meta`
    /// into reserved page 0.
    pub fn create(
        path: &Path,
        page_size: usize,
        meta: &[u8],
        sync_mode: SyncMode,
    ) -> PagerResult<Self> {
        if meta.len() > page_size {
            return Err(PagerError::PageOverflow {
                len: meta.len(),
                page_size,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        lock::lock_exclusive(&file, path)?;

        let mut page0 = vec![0u8; page_size];
        page0[..meta.len()].copy_from_slice(meta);
        (&file).write_all(&page0)?;
        file.sync_all()?;

        let allocation = Allocation {
            page_count: 1,
            ..Default::default()
        };

        debug!(path = %path.display(), page_size, "created page file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            sync_mode,
            current: allocation.clone(),
            committed: allocation,
            released: Vec::new(),
            fresh: HashSet::new(),
            dirty: BTreeMap::new(),
        })
    }

    /// Adopt an already-locked file whose committed state is `state`.
    ///
    /// Loads the free list and validates it against the page count.
    pub fn attach(
        file: File,
        path: &Path,
        page_size: usize,
        state: FileState,
        sync_mode: SyncMode,
    ) -> PagerResult<Self> {
        let file_len = file.metadata()?.len();
        if state.page_count == 0 || file_len < state.page_count * page_size as u64 {
            return Err(PagerError::Corrupt(format!(
                "{} holds {file_len} bytes, header expects {} pages of {page_size}",
                path.display(),
                state.page_count
            )));
        }

        let mut page_file = Self {
            file,
            path: path.to_path_buf(),
            page_size,
            sync_mode,
            current: Allocation {
                page_count: state.page_count,
                ..Default::default()
            },
            committed: Allocation::default(),
            released: Vec::new(),
            fresh: HashSet::new(),
            dirty: BTreeMap::new(),
        };
        page_file.load_free_list(state)?;
        page_file.committed = page_file.current.clone();
        Ok(page_file)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of pages, including allocations of the open transaction.
    pub fn page_count(&self) -> u64 {
        self.current.page_count
    }

    /// Number of pages immediately available for allocation.
    pub fn free_count(&self) -> usize {
        self.current.free.len()
    }

    /// Returns `true` if the open transaction changed anything.
    pub fn has_changes(&self) -> bool {
        !self.fresh.is_empty()
            || !self.released.is_empty()
            || self.current.page_count != self.committed.page_count
    }

    /// Returns `true` if `page` was allocated by the open transaction.
    pub fn is_fresh(&self, page: PageId) -> bool {
        self.fresh.contains(&page)
    }

    /// Allocate a page, reusing the free list before growing the file.
    pub fn allocate(&mut self) -> PageId {
        let page = match self.current.free.pop() {
            Some(page) => page,
            None => {
                let page = PageId::new(self.current.page_count);
                self.current.page_count += 1;
                page
            }
        };
        self.fresh.insert(page);
        page
    }

    /// Return a page to the allocator.
    ///
    /// Pages allocated by the open transaction are reusable immediately;
    /// committed pages only after the next commit. Contents are not zeroed.
    pub fn free(&mut self, page: PageId) -> PagerResult<()> {
        self.check_range(page)?;
        if self.fresh.remove(&page) {
            self.dirty.remove(&page);
            self.current.free.push(page);
        } else {
            self.released.push(page);
        }
        Ok(())
    }

    /// Read a page, seeing buffered writes of the open transaction.
    pub fn read(&self, page: PageId) -> PagerResult<Vec<u8>> {
        self.check_range(page)?;
        if let Some(buf) = self.dirty.get(&page) {
            return Ok(buf.clone());
        }
        let mut buf = vec![0u8; self.page_size];
        self.read_exact_at(page.offset(self.page_size), &mut buf)?;
        Ok(buf)
    }

    /// Buffer a write to a page allocated by the open transaction.
    pub fn write(&mut self, page: PageId, mut data: Vec<u8>) -> PagerResult<()> {
        self.check_range(page)?;
        if !self.fresh.contains(&page) {
            return Err(PagerError::CommittedPage(page));
        }
        if data.len() > self.page_size {
            return Err(PagerError::PageOverflow {
                len: data.len(),
                page_size: self.page_size,
            });
        }
        data.resize(self.page_size, 0);
        self.dirty.insert(page, data);
        Ok(())
    }

    /// Read `len` bytes of reserved page 0 starting at `offset`.
    pub fn read_meta(&self, offset: u64, len: usize) -> PagerResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Write into reserved page 0 and make the write durable per sync mode.
    pub fn write_meta(&mut self, offset: u64, bytes: &[u8]) -> PagerResult<()> {
        if offset as usize + bytes.len() > self.page_size {
            return Err(PagerError::PageOverflow {
                len: offset as usize + bytes.len(),
                page_size: self.page_size,
            });
        }
        let mut f = &self.file;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(bytes)?;
        self.sync()
    }

    /// Rewrite the free list into trunk pages and return the state to record
    /// in the next header.
    ///
    /// After this call no further allocation may happen until
    /// [`finish_commit`](Self::finish_commit) or [`rollback`](Self::rollback).
    pub fn prepare_commit(&mut self) -> PagerResult<FileState> {
        let capacity = trunk_capacity(self.page_size);
        let released = std::mem::take(&mut self.released);
        let old_trunk = std::mem::take(&mut self.current.trunk);
        let total = self.current.free.len() + released.len() + old_trunk.len();

        // Trunk pages may only come from pages free under the old header.
        let mut trunk = Vec::new();
        let mut taken = 0;
        loop {
            let needed = (total - taken).div_ceil(capacity);
            if trunk.len() >= needed {
                break;
            }
            match self.current.free.pop() {
                Some(page) => {
                    taken += 1;
                    trunk.push(page);
                }
                None => {
                    trunk.push(PageId::new(self.current.page_count));
                    self.current.page_count += 1;
                }
            }
        }

        let mut ids = std::mem::take(&mut self.current.free);
        ids.extend(released);
        ids.extend(old_trunk);

        for (i, page) in trunk.iter().enumerate() {
            let start = (i * capacity).min(ids.len());
            let end = (start + capacity).min(ids.len());
            let record = TrunkPage {
                next: trunk.get(i + 1).copied().unwrap_or(PageId::NULL),
                ids: ids[start..end].to_vec(),
            };
            let mut bytes = encode_framed(&record, self.page_size)?;
            bytes.resize(self.page_size, 0);
            self.dirty.insert(*page, bytes);
        }

        let state = FileState {
            page_count: self.current.page_count,
            free_head: trunk.first().copied().unwrap_or(PageId::NULL),
            free_len: ids.len() as u64,
        };

        debug!(
            path = %self.path.display(),
            free = ids.len(),
            trunk_pages = trunk.len(),
            page_count = state.page_count,
            "free list rewritten"
        );

        self.current.free = ids;
        self.current.trunk = trunk;
        Ok(state)
    }

    /// Write all buffered pages and make them durable per sync mode.
    pub fn flush(&mut self) -> PagerResult<()> {
        let mut f = &self.file;
        for (page, data) in &self.dirty {
            f.seek(SeekFrom::Start(page.offset(self.page_size)))?;
            f.write_all(data)?;
        }

        // Pages allocated and freed in one transaction are never written, so
        // the file may still be shorter than its page count.
        let required = self.current.page_count * self.page_size as u64;
        if self.file.metadata()?.len() < required {
            self.file.set_len(required)?;
        }

        self.sync()
    }

    /// Adopt the prepared state as committed once the header is durable.
    pub fn finish_commit(&mut self) {
        self.committed = self.current.clone();
        self.fresh.clear();
        self.dirty.clear();
    }

    /// Discard every change since the last commit.
    pub fn rollback(&mut self) {
        self.current = self.committed.clone();
        self.released.clear();
        self.fresh.clear();
        self.dirty.clear();
    }

    /// Discard pending changes, sync, and release the lock.
    pub fn close(mut self) -> PagerResult<()> {
        self.rollback();
        self.file.sync_all()?;
        lock::unlock(&self.file, &self.path)
    }

    fn check_range(&self, page: PageId) -> PagerResult<()> {
        if page.is_null() || page.get() >= self.current.page_count {
            return Err(PagerError::PageOutOfRange {
                page,
                page_count: self.current.page_count,
            });
        }
        Ok(())
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> PagerResult<()> {
        let mut f = &self.file;
        f.seek(SeekFrom::Start(offset))?;
        match f.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(PagerError::Corrupt(
                format!("{} ends before offset {}", self.path.display(), offset + buf.len() as u64),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn sync(&self) -> PagerResult<()> {
        match self.sync_mode {
            SyncMode::EveryCommit => self.file.sync_data()?,
            SyncMode::OsDefault => {}
        }
        Ok(())
    }

    fn load_free_list(&mut self, state: FileState) -> PagerResult<()> {
        let mut next = state.free_head;
        let mut free = Vec::new();
        let mut trunk = Vec::new();

        while !next.is_null() {
            if trunk.len() as u64 >= self.current.page_count {
                return Err(PagerError::Corrupt(format!(
                    "free list of {} does not terminate",
                    self.path.display()
                )));
            }
            let buf = self.read(next)?;
            let record: TrunkPage = decode_framed(&buf)?;
            trunk.push(next);
            free.extend(record.ids);
            next = record.next;
        }

        if free.len() as u64 != state.free_len {
            return Err(PagerError::Corrupt(format!(
                "free list of {} holds {} pages, header records {}",
                self.path.display(),
                free.len(),
                state.free_len
            )));
        }
        if let Some(bad) = free
            .iter()
            .find(|p| p.is_null() || p.get() >= self.current.page_count)
        {
            return Err(PagerError::Corrupt(format!(
                "free list of {} references page {bad} beyond page count {}",
                self.path.display(),
                self.current.page_count
            )));
        }

        self.current.free = free;
        self.current.trunk = trunk;
        Ok(())
    }
}

/// Number of page ids one trunk page can hold.
fn trunk_capacity(page_size: usize) -> usize {
    (page_size - FRAME_HEADER_SIZE - TRUNK_OVERHEAD) / 8
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 512;

    fn create(dir: &Path) -> PageFile {
        PageFile::create(&dir.join("pages.dat"), PAGE, b"meta", SyncMode::EveryCommit).unwrap()
    }

    fn commit(pf: &mut PageFile) -> FileState {
        let state = pf.prepare_commit().unwrap();
        pf.flush().unwrap();
        pf.finish_commit();
        state
    }

    fn reopen(pf: PageFile, state: FileState) -> PageFile {
        let path = pf.path().to_path_buf();
        pf.close().unwrap();
        let file = lock::open_locked(&path).unwrap();
        PageFile::attach(file, &path, PAGE, state, SyncMode::EveryCommit).unwrap()
    }

    #[test]
    fn create_writes_meta_page() {
        let dir = tempfile::tempdir().unwrap();
        let pf = create(dir.path());
        assert_eq!(pf.page_count(), 1);
        assert_eq!(pf.read_meta(0, 4).unwrap(), b"meta");
        assert!(!pf.has_changes());
    }

    #[test]
    fn create_fails_if_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let _pf = create(dir.path());
        let err = PageFile::create(&dir.path().join("pages.dat"), PAGE, b"", SyncMode::EveryCommit)
            .unwrap_err();
        assert!(matches!(err, PagerError::Io(_)));
    }

    #[test]
    fn allocate_extends_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());

        let a = pf.allocate();
        let b = pf.allocate();
        assert_eq!(a, PageId::new(1));
        assert_eq!(b, PageId::new(2));

        // A page freed in the same transaction is reusable right away.
        pf.free(b).unwrap();
        assert_eq!(pf.allocate(), b);
    }

    #[test]
    fn committed_pages_are_reused_only_after_commit() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let a = pf.allocate();
        pf.write(a, b"A".to_vec()).unwrap();
        commit(&mut pf);

        pf.free(a).unwrap();
        let next = pf.allocate();
        assert_ne!(next, a, "committed page reused before commit");
        pf.write(next, b"B".to_vec()).unwrap();
        commit(&mut pf);

        // `a` is now on the free list; the trunk page holding the list came
        // from elsewhere, so the next allocation hands `a` back.
        let mut seen = HashSet::new();
        for _ in 0..4 {
            seen.insert(pf.allocate());
        }
        assert!(seen.contains(&a));
    }

    #[test]
    fn committed_page_cannot_be_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let a = pf.allocate();
        pf.write(a, vec![1; 8]).unwrap();
        commit(&mut pf);

        let err = pf.write(a, vec![2; 8]).unwrap_err();
        assert!(matches!(err, PagerError::CommittedPage(p) if p == a));
    }

    #[test]
    fn read_sees_buffered_writes_and_flushed_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let a = pf.allocate();
        pf.write(a, b"hello".to_vec()).unwrap();
        assert_eq!(&pf.read(a).unwrap()[..5], b"hello");

        commit(&mut pf);
        let page = pf.read(a).unwrap();
        assert_eq!(page.len(), PAGE);
        assert_eq!(&page[..5], b"hello");
    }

    #[test]
    fn out_of_range_reads_fail() {
        let dir = tempfile::tempdir().unwrap();
        let pf = create(dir.path());
        assert!(matches!(
            pf.read(PageId::NULL),
            Err(PagerError::PageOutOfRange { .. })
        ));
        assert!(matches!(
            pf.read(PageId::new(5)),
            Err(PagerError::PageOutOfRange { .. })
        ));
    }

    #[test]
    fn oversized_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let a = pf.allocate();
        let err = pf.write(a, vec![0; PAGE + 1]).unwrap_err();
        assert!(matches!(err, PagerError::PageOverflow { .. }));
    }

    #[test]
    fn rollback_restores_committed_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let a = pf.allocate();
        pf.write(a, vec![1; 4]).unwrap();
        commit(&mut pf);

        let b = pf.allocate();
        pf.write(b, vec![2; 4]).unwrap();
        pf.free(a).unwrap();
        assert!(pf.has_changes());

        pf.rollback();
        assert!(!pf.has_changes());
        assert_eq!(pf.page_count(), 2);
        assert_eq!(&pf.read(a).unwrap()[..4], &[1; 4]);
    }

    #[test]
    fn free_list_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let pages: Vec<PageId> = (0..10).map(|_| pf.allocate()).collect();
        for p in &pages {
            pf.write(*p, vec![9; 16]).unwrap();
        }
        commit(&mut pf);

        for p in &pages[..6] {
            pf.free(*p).unwrap();
        }
        let state = commit(&mut pf);
        assert_eq!(state.free_len, 6);
        assert!(!state.free_head.is_null());

        let pf = reopen(pf, state);
        assert_eq!(pf.free_count(), 6);
        assert_eq!(pf.page_count(), state.page_count);
    }

    #[test]
    fn long_free_list_spans_several_trunk_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let capacity = trunk_capacity(PAGE);
        let pages: Vec<PageId> = (0..capacity * 2 + 5).map(|_| pf.allocate()).collect();
        for p in &pages {
            pf.write(*p, vec![1]).unwrap();
        }
        commit(&mut pf);

        for p in &pages {
            pf.free(*p).unwrap();
        }
        let state = commit(&mut pf);
        let pf = reopen(pf, state);
        assert_eq!(pf.free_count() as u64, state.free_len);
        assert!(state.free_len as usize >= pages.len() - 3);
    }

    #[test]
    fn attach_rejects_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let pf = create(dir.path());
        let path = pf.path().to_path_buf();
        pf.close().unwrap();

        let file = lock::open_locked(&path).unwrap();
        let state = FileState {
            page_count: 40,
            ..FileState::empty()
        };
        let err = PageFile::attach(file, &path, PAGE, state, SyncMode::EveryCommit).unwrap_err();
        assert!(matches!(err, PagerError::Corrupt(_)));
    }

    #[test]
    fn attach_rejects_free_list_length_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut pf = create(dir.path());
        let a = pf.allocate();
        pf.write(a, vec![1]).unwrap();
        commit(&mut pf);
        pf.free(a).unwrap();
        let mut state = commit(&mut pf);
        state.free_len += 3;

        let path = pf.path().to_path_buf();
        pf.close().unwrap();
        let file = lock::open_locked(&path).unwrap();
        let err = PageFile::attach(file, &path, PAGE, state, SyncMode::EveryCommit).unwrap_err();
        assert!(matches!(err, PagerError::Corrupt(_)));
    }
}
