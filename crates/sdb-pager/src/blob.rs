//! Chained blob pages for values too large to store inline.
//!
//! A blob is a singly linked chain of framed pages, each carrying the id of
//! the next page and a chunk of the value. A [`BlobRef`] records the first
//! page and the total length; readers check both against the chain.

use serde::{Deserialize, Serialize};

use sdb_types::PageId;

use crate::error::{PagerError, PagerResult};
use crate::frame::{decode_framed, encode_framed, FRAME_HEADER_SIZE};
use crate::header::FORMAT_VERSION;
use crate::page_file::PageFile;

/// Magic bytes identifying a blob file.
pub const BLOB_MAGIC: [u8; 8] = *b"SDBBLOB1";

/// Bytes of bincode overhead in a blob page: `next` + chunk length.
const BLOB_PAGE_OVERHEAD: usize = 16;

/// Location of a value body in the blob file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// First page of the chain.
    pub first: PageId,
    /// Total value length in bytes.
    pub len: u64,
}

/// Contents of page 0 of a blob file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobFileHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub page_size: u32,
}

impl BlobFileHeader {
    pub fn new(page_size: u32) -> Self {
        Self {
            magic: BLOB_MAGIC,
            version: FORMAT_VERSION,
            page_size,
        }
    }

    pub fn encode(&self) -> PagerResult<Vec<u8>> {
        encode_framed(self, self.page_size as usize)
    }

    /// Decode page 0 and check magic and version.
    pub fn decode_any(buf: &[u8]) -> PagerResult<Self> {
        let header: BlobFileHeader = decode_framed(buf)?;
        if header.magic != BLOB_MAGIC {
            return Err(PagerError::Corrupt("bad blob file magic".into()));
        }
        if header.version != FORMAT_VERSION {
            return Err(PagerError::Corrupt(format!(
                "unsupported blob format version {}",
                header.version
            )));
        }
        Ok(header)
    }

    /// Decode page 0 and check it matches the expected page size.
    pub fn decode(buf: &[u8], expected_page_size: u32) -> PagerResult<Self> {
        let header = Self::decode_any(buf)?;
        if header.page_size != expected_page_size {
            return Err(PagerError::Corrupt(format!(
                "blob page size {} does not match header ({expected_page_size})",
                header.page_size
            )));
        }
        Ok(header)
    }
}

#[derive(Serialize, Deserialize)]
struct BlobPage {
    next: PageId,
    bytes: Vec<u8>,
}

/// Payload bytes one blob page can carry.
pub fn chunk_capacity(page_size: usize) -> usize {
    page_size - FRAME_HEADER_SIZE - BLOB_PAGE_OVERHEAD
}

/// Number of pages a blob of `len` bytes occupies. Empty blobs use one page.
pub fn pages_for(len: u64, page_size: usize) -> u64 {
    len.div_ceil(chunk_capacity(page_size) as u64).max(1)
}

/// Write `bytes` into a newly allocated chain.
pub fn write_blob(file: &mut PageFile, bytes: &[u8]) -> PagerResult<BlobRef> {
    let page_size = file.page_size();
    let capacity = chunk_capacity(page_size);
    let count = pages_for(bytes.len() as u64, page_size) as usize;
    let pages: Vec<PageId> = (0..count).map(|_| file.allocate()).collect();

    for (i, page) in pages.iter().enumerate() {
        let start = (i * capacity).min(bytes.len());
        let end = (start + capacity).min(bytes.len());
        let record = BlobPage {
            next: pages.get(i + 1).copied().unwrap_or(PageId::NULL),
            bytes: bytes[start..end].to_vec(),
        };
        file.write(*page, encode_framed(&record, page_size)?)?;
    }

    Ok(BlobRef {
        first: pages[0],
        len: bytes.len() as u64,
    })
}

/// Read the value a [`BlobRef`] points to.
pub fn read_blob(file: &PageFile, blob: BlobRef) -> PagerResult<Vec<u8>> {
    let len = usize::try_from(blob.len)
        .map_err(|_| PagerError::Corrupt(format!("blob length {} too large", blob.len)))?;
    let mut out = Vec::with_capacity(len);
    for_each_page(file, blob, |_, chunk| out.extend_from_slice(chunk))?;
    if out.len() != len {
        return Err(PagerError::Corrupt(format!(
            "blob at {} holds {} bytes, expected {len}",
            blob.first,
            out.len()
        )));
    }
    Ok(out)
}

/// Release every page of a chain.
pub fn free_blob(file: &mut PageFile, blob: BlobRef) -> PagerResult<()> {
    let mut pages = Vec::new();
    for_each_page(file, blob, |page, _| pages.push(page))?;
    for page in pages {
        file.free(page)?;
    }
    Ok(())
}

/// Walk a chain, refusing chains longer or shorter than `blob.len` implies.
fn for_each_page(
    file: &PageFile,
    blob: BlobRef,
    mut visit: impl FnMut(PageId, &[u8]),
) -> PagerResult<()> {
    let expected = pages_for(blob.len, file.page_size());
    let mut next = blob.first;
    let mut seen = 0u64;

    while !next.is_null() {
        if seen == expected {
            return Err(PagerError::Corrupt(format!(
                "blob at {} is longer than {expected} pages",
                blob.first
            )));
        }
        let record: BlobPage = decode_framed(&file.read(next)?)?;
        visit(next, &record.bytes);
        seen += 1;
        next = record.next;
    }

    if seen != expected {
        return Err(PagerError::Corrupt(format!(
            "blob at {} ends after {seen} of {expected} pages",
            blob.first
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_file::SyncMode;

    const PAGE: usize = 512;

    fn blob_file(dir: &std::path::Path) -> PageFile {
        let meta = BlobFileHeader::new(PAGE as u32).encode().unwrap();
        PageFile::create(&dir.join("t.block"), PAGE, &meta, SyncMode::OsDefault).unwrap()
    }

    #[test]
    fn small_blob_uses_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = blob_file(dir.path());
        let r = write_blob(&mut file, b"hello").unwrap();
        assert_eq!(r.len, 5);
        assert_eq!(file.page_count(), 2);
        assert_eq!(read_blob(&file, r).unwrap(), b"hello");
    }

    #[test]
    fn empty_blob_still_has_a_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = blob_file(dir.path());
        let r = write_blob(&mut file, b"").unwrap();
        assert!(!r.first.is_null());
        assert_eq!(read_blob(&file, r).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn large_blob_spans_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = blob_file(dir.path());
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let r = write_blob(&mut file, &data).unwrap();
        assert_eq!(
            file.page_count() - 1,
            pages_for(data.len() as u64, PAGE)
        );
        assert_eq!(read_blob(&file, r).unwrap(), data);
    }

    #[test]
    fn exact_multiple_of_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = blob_file(dir.path());
        let data = vec![3u8; chunk_capacity(PAGE) * 2];
        let r = write_blob(&mut file, &data).unwrap();
        assert_eq!(pages_for(r.len, PAGE), 2);
        assert_eq!(read_blob(&file, r).unwrap(), data);
    }

    #[test]
    fn free_blob_returns_every_page() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = blob_file(dir.path());
        let data = vec![1u8; 2000];
        let r = write_blob(&mut file, &data).unwrap();
        let pages = pages_for(r.len, PAGE) as usize;

        free_blob(&mut file, r).unwrap();
        assert_eq!(file.free_count(), pages);
    }

    #[test]
    fn length_mismatch_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = blob_file(dir.path());
        let r = write_blob(&mut file, &[9u8; 1500]).unwrap();

        let short = BlobRef { len: 10, ..r };
        assert!(matches!(read_blob(&file, short), Err(PagerError::Corrupt(_))));

        let long = BlobRef { len: 3000, ..r };
        assert!(matches!(read_blob(&file, long), Err(PagerError::Corrupt(_))));
    }

    #[test]
    fn blob_file_header_checks() {
        let bytes = BlobFileHeader::new(4096).encode().unwrap();
        assert!(BlobFileHeader::decode(&bytes, 4096).is_ok());
        assert!(BlobFileHeader::decode(&bytes, 8192).is_err());
        assert!(BlobFileHeader::decode(&[0u8; 64], 4096).is_err());
    }
}
