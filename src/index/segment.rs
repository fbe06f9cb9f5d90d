//! Immutable on-disk segments
//!
//! File layout:
//!
//! ```text
//! "FPSG"
//! block*        u32 count | u32 payload_len | u32 crc32(payload) | payload
//! doc set       serialized roaring bitmap of the segment's documents
//! block index   u32 first_term | u32 last_term | u64 offset      (per block)
//! footer        u32 block_count | u64 docs_offset | u64 index_offset | "FPSG"
//! ```
//!
//! A block payload holds sorted postings as vbyte(term delta) followed by
//! vbyte(doc_id delta) when the term repeats, or vbyte(doc_id) otherwise.
//! Every posting takes at least two payload bytes.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use super::posting::{BlockReader, Posting};
use crate::error::{FpIndexError, Result};
use crate::vfs::{FileSystem, InputFile};

const SEGMENT_MAGIC: &[u8; 4] = b"FPSG";
const BLOCK_HEADER_LEN: usize = 12;
const INDEX_ENTRY_LEN: usize = 16;
const FOOTER_LEN: usize = 24;
const MIN_POSTING_LEN: usize = 2;

/// File name of the segment with the given ID
pub fn segment_file_name(id: u64) -> String {
    format!("segment-{:08}.fpseg", id)
}

/// Summary of a written segment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Distinct documents with at least one posting
    pub doc_count: u64,
    pub posting_count: u64,
    pub min_doc_id: Option<u32>,
    pub max_doc_id: Option<u32>,
    pub block_count: u32,
    pub size_bytes: u64,
    /// CRC32 over all block payloads
    pub checksum: u32,
}

/// Location and term range of one block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BlockMeta {
    first_term: u32,
    last_term: u32,
    offset: u64,
}

/// Variable-byte encoding, low groups first, high bit set on the last byte
fn encode_vbyte(value: u32, output: &mut Vec<u8>) {
    let mut v = value;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            output.push(byte | 0x80);
            break;
        } else {
            output.push(byte);
        }
    }
}

fn decode_vbyte(input: &[u8], pos: &mut usize) -> Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;

    loop {
        let byte = *input
            .get(*pos)
            .ok_or_else(|| FpIndexError::CorruptSegment("unexpected end of vbyte".to_string()))?;
        *pos += 1;

        result |= ((byte & 0x7F) as u32) << shift;

        if byte & 0x80 != 0 {
            return Ok(result);
        }

        shift += 7;
        if shift > 28 {
            return Err(FpIndexError::CorruptSegment(
                "vbyte value too large".to_string(),
            ));
        }
    }
}

fn encode_block(postings: &[Posting], output: &mut Vec<u8>) {
    let mut previous: Option<Posting> = None;
    for posting in postings {
        match previous {
            Some(prev) if prev.term == posting.term => {
                encode_vbyte(0, output);
                encode_vbyte(posting.doc_id - prev.doc_id, output);
            }
            Some(prev) => {
                encode_vbyte(posting.term - prev.term, output);
                encode_vbyte(posting.doc_id, output);
            }
            None => {
                encode_vbyte(posting.term, output);
                encode_vbyte(posting.doc_id, output);
            }
        }
        previous = Some(*posting);
    }
}

fn decode_block(payload: &[u8], count: usize) -> Result<Vec<Posting>> {
    // the count is outside the checksum
    if count > payload.len() / MIN_POSTING_LEN {
        return Err(FpIndexError::CorruptSegment(format!(
            "block claims {} postings in {} bytes",
            count,
            payload.len()
        )));
    }

    let mut postings = Vec::with_capacity(count);
    let mut pos = 0;
    let mut term = 0u32;
    let mut doc_id = 0u32;

    for i in 0..count {
        let term_delta = decode_vbyte(payload, &mut pos)?;
        let doc_value = decode_vbyte(payload, &mut pos)?;
        if i > 0 && term_delta == 0 {
            doc_id = doc_id.wrapping_add(doc_value);
        } else {
            term = term.wrapping_add(term_delta);
            doc_id = doc_value;
        }
        postings.push(Posting::new(term, doc_id));
    }

    if pos != payload.len() {
        return Err(FpIndexError::CorruptSegment(format!(
            "block has {} trailing bytes",
            payload.len() - pos
        )));
    }
    Ok(postings)
}

/// Writes sorted postings into a new segment file
pub struct SegmentWriter {
    block_size: usize,
}

impl SegmentWriter {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    /// Drain `reader` into the segment file `name`.
    ///
    /// The file is only visible once every block was written and synced.
    pub fn write<R: BlockReader + ?Sized>(
        &self,
        fs: &dyn FileSystem,
        name: &str,
        reader: &mut R,
    ) -> Result<SegmentInfo> {
        let mut file = fs.create_atomic_file(name)?;
        file.write_all(SEGMENT_MAGIC)?;

        let mut state = WriteState {
            offset: SEGMENT_MAGIC.len() as u64,
            blocks: Vec::new(),
            hasher: crc32fast::Hasher::new(),
            payload: Vec::new(),
        };
        let mut info = SegmentInfo::default();
        let mut pending: Vec<Posting> = Vec::with_capacity(self.block_size);
        let mut last: Option<Posting> = None;
        let mut docs = RoaringBitmap::new();

        while let Some(block) = reader.read_block()? {
            for posting in block {
                if let Some(prev) = last {
                    if posting < prev {
                        return Err(FpIndexError::Internal(format!(
                            "postings out of order: {:?} after {:?}",
                            posting, prev
                        )));
                    }
                }
                last = Some(posting);

                info.posting_count += 1;
                docs.insert(posting.doc_id);

                pending.push(posting);
                if pending.len() == self.block_size {
                    state.write_block(&mut *file, &pending)?;
                    pending.clear();
                }
            }
        }
        if !pending.is_empty() {
            state.write_block(&mut *file, &pending)?;
        }

        let docs_offset = state.offset;
        let mut doc_set = Vec::with_capacity(docs.serialized_size());
        docs.serialize_into(&mut doc_set)?;
        file.write_all(&doc_set)?;

        let index_offset = docs_offset + doc_set.len() as u64;
        let mut index = Vec::with_capacity(state.blocks.len() * INDEX_ENTRY_LEN + FOOTER_LEN);
        for meta in &state.blocks {
            index.extend_from_slice(&meta.first_term.to_le_bytes());
            index.extend_from_slice(&meta.last_term.to_le_bytes());
            index.extend_from_slice(&meta.offset.to_le_bytes());
        }
        index.extend_from_slice(&(state.blocks.len() as u32).to_le_bytes());
        index.extend_from_slice(&docs_offset.to_le_bytes());
        index.extend_from_slice(&index_offset.to_le_bytes());
        index.extend_from_slice(SEGMENT_MAGIC);
        file.write_all(&index)?;
        file.commit()?;

        info.doc_count = docs.len();
        info.min_doc_id = docs.min();
        info.max_doc_id = docs.max();
        info.block_count = state.blocks.len() as u32;
        info.size_bytes = index_offset + index.len() as u64;
        info.checksum = state.hasher.finalize();
        Ok(info)
    }
}

struct WriteState {
    offset: u64,
    blocks: Vec<BlockMeta>,
    hasher: crc32fast::Hasher,
    payload: Vec<u8>,
}

impl WriteState {
    fn write_block<W: Write + ?Sized>(&mut self, file: &mut W, postings: &[Posting]) -> Result<()> {
        self.payload.clear();
        encode_block(postings, &mut self.payload);
        self.hasher.update(&self.payload);

        let mut header = [0u8; BLOCK_HEADER_LEN];
        header[0..4].copy_from_slice(&(postings.len() as u32).to_le_bytes());
        header[4..8].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        header[8..12].copy_from_slice(&crc32fast::hash(&self.payload).to_le_bytes());
        file.write_all(&header)?;
        file.write_all(&self.payload)?;

        self.blocks.push(BlockMeta {
            first_term: postings[0].term,
            last_term: postings[postings.len() - 1].term,
            offset: self.offset,
        });
        self.offset += (BLOCK_HEADER_LEN + self.payload.len()) as u64;
        Ok(())
    }
}

/// Opened segment file with its block index and document set loaded
pub struct SegmentReader {
    fs: Arc<dyn FileSystem>,
    name: String,
    blocks: Vec<BlockMeta>,
    docs: RoaringBitmap,
}

impl SegmentReader {
    /// Open the segment `name` and validate its footer and block index
    pub fn open(fs: Arc<dyn FileSystem>, name: &str) -> Result<Self> {
        let mut file = fs.open_file(name)?;
        let corrupt =
            |reason: &str| FpIndexError::CorruptSegment(format!("{}: {}", name, reason));

        let len = file.seek(SeekFrom::End(0))?;
        if len < (SEGMENT_MAGIC.len() + FOOTER_LEN) as u64 {
            return Err(corrupt("file too short"));
        }

        let mut magic = [0u8; 4];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut magic)?;
        if &magic != SEGMENT_MAGIC {
            return Err(corrupt("bad header magic"));
        }

        let mut footer = [0u8; FOOTER_LEN];
        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        file.read_exact(&mut footer)?;
        if &footer[20..24] != SEGMENT_MAGIC {
            return Err(corrupt("bad footer magic"));
        }
        let block_count = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]) as usize;
        let read_u64 = |range: std::ops::Range<usize>| -> Result<u64> {
            let bytes = footer[range].try_into().map_err(|_| corrupt("bad footer"))?;
            Ok(u64::from_le_bytes(bytes))
        };
        let docs_offset = read_u64(4..12)?;
        let index_offset = read_u64(12..20)?;

        let index_len = (block_count * INDEX_ENTRY_LEN) as u64;
        if index_offset.checked_add(index_len + FOOTER_LEN as u64) != Some(len) {
            return Err(corrupt("block index does not match file size"));
        }
        if docs_offset < SEGMENT_MAGIC.len() as u64 || docs_offset > index_offset {
            return Err(corrupt("document set out of bounds"));
        }

        let mut doc_set = vec![0u8; (index_offset - docs_offset) as usize];
        file.seek(SeekFrom::Start(docs_offset))?;
        file.read_exact(&mut doc_set)?;
        let docs = RoaringBitmap::deserialize_from(&doc_set[..])
            .map_err(|e| corrupt(&format!("bad document set: {}", e)))?;

        let mut index = vec![0u8; index_len as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index)?;

        let blocks = index
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(|entry| BlockMeta {
                first_term: u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]),
                last_term: u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]),
                offset: u64::from_le_bytes([
                    entry[8], entry[9], entry[10], entry[11], entry[12], entry[13], entry[14],
                    entry[15],
                ]),
            })
            .collect();

        Ok(Self {
            fs,
            name: name.to_string(),
            blocks,
            docs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the segment holds postings of `doc_id`
    pub fn contains_doc(&self, doc_id: u32) -> bool {
        self.docs.contains(doc_id)
    }

    pub fn doc_count(&self) -> u64 {
        self.docs.len()
    }

    /// Reader over every posting, skipping deleted documents
    pub fn reader<'a>(&'a self, deleted: &'a RoaringBitmap) -> Result<SegmentBlockReader<'a>> {
        let selected = (0..self.blocks.len()).collect();
        self.block_reader(selected, None, deleted)
    }

    /// Reader over the postings of the given terms, skipping deleted documents.
    ///
    /// `terms` must be sorted ascending. Blocks whose term range holds none
    /// of the terms are never read.
    pub fn reader_for_terms<'a>(
        &'a self,
        terms: &'a [u32],
        deleted: &'a RoaringBitmap,
    ) -> Result<SegmentBlockReader<'a>> {
        let selected = self
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, meta)| {
                let idx = terms.partition_point(|&term| term < meta.first_term);
                idx < terms.len() && terms[idx] <= meta.last_term
            })
            .map(|(i, _)| i)
            .collect();
        self.block_reader(selected, Some(terms), deleted)
    }

    fn block_reader<'a>(
        &'a self,
        selected: Vec<usize>,
        terms: Option<&'a [u32]>,
        deleted: &'a RoaringBitmap,
    ) -> Result<SegmentBlockReader<'a>> {
        let file = if selected.is_empty() {
            None
        } else {
            Some(self.fs.open_file(&self.name)?)
        };
        Ok(SegmentBlockReader {
            segment: self,
            file,
            selected,
            next: 0,
            terms,
            deleted,
        })
    }
}

/// Block reader over (a subset of) a segment's blocks.
///
/// Each reader owns its own file handle.
pub struct SegmentBlockReader<'a> {
    segment: &'a SegmentReader,
    file: Option<Box<dyn InputFile>>,
    selected: Vec<usize>,
    next: usize,
    terms: Option<&'a [u32]>,
    deleted: &'a RoaringBitmap,
}

impl SegmentBlockReader<'_> {
    fn load_block(&mut self, meta: BlockMeta) -> Result<Vec<Posting>> {
        let name = &self.segment.name;
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FpIndexError::Internal(format!("{}: reader has no file", name)))?;

        let mut header = [0u8; BLOCK_HEADER_LEN];
        file.seek(SeekFrom::Start(meta.offset))?;
        read_exact_or_corrupt(file, &mut header, name)?;

        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let payload_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let stored_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

        let mut payload = vec![0u8; payload_len];
        read_exact_or_corrupt(file, &mut payload, name)?;
        if crc32fast::hash(&payload) != stored_crc {
            return Err(FpIndexError::CorruptSegment(format!(
                "{}: block checksum mismatch at offset {}",
                name, meta.offset
            )));
        }

        decode_block(&payload, count)
    }
}

fn read_exact_or_corrupt(file: &mut Box<dyn InputFile>, buf: &mut [u8], name: &str) -> Result<()> {
    file.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FpIndexError::CorruptSegment(format!("{}: truncated block", name))
        } else {
            FpIndexError::Io(e)
        }
    })
}

impl BlockReader for SegmentBlockReader<'_> {
    fn read_block(&mut self) -> Result<Option<Vec<Posting>>> {
        let Some(&block_idx) = self.selected.get(self.next) else {
            self.file = None;
            return Ok(None);
        };
        let meta = self.segment.blocks[block_idx];
        let mut postings = self.load_block(meta)?;
        self.next += 1;

        let deleted = self.deleted;
        match self.terms {
            Some(terms) => postings.retain(|posting| {
                terms.binary_search(&posting.term).is_ok() && !deleted.contains(posting.doc_id)
            }),
            None if !deleted.is_empty() => {
                postings.retain(|posting| !deleted.contains(posting.doc_id))
            }
            None => {}
        }
        Ok(Some(postings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::posting::{read_all, VecReader};
    use crate::vfs::LocalFileSystem;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<dyn FileSystem>) {
        let tmp = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::open(tmp.path()).unwrap());
        (tmp, fs)
    }

    fn sample_postings() -> Vec<Posting> {
        let mut postings = Vec::new();
        for term in (0..200u32).map(|t| t * 3) {
            for doc_id in [term % 7, 100 + term % 11, 100_000 + term] {
                postings.push(Posting::new(term, doc_id));
            }
        }
        postings.sort();
        postings
    }

    #[test]
    fn test_vbyte_roundtrip() {
        let values = [0u32, 1, 127, 128, 300, 1 << 21, u32::MAX];
        let mut data = Vec::new();
        for &v in &values {
            encode_vbyte(v, &mut data);
        }
        let mut pos = 0;
        for &v in &values {
            assert_eq!(decode_vbyte(&data, &mut pos).unwrap(), v);
        }
        assert_eq!(pos, data.len());
    }

    #[test]
    fn test_write_and_read_segment() {
        let (_tmp, fs) = setup();
        let postings = sample_postings();

        let info = SegmentWriter::new(64)
            .write(&*fs, "s1", &mut VecReader::new(postings.clone(), 100))
            .unwrap();
        assert_eq!(info.posting_count, postings.len() as u64);
        assert_eq!(info.doc_count, 7 + 11 + 200);
        assert_eq!(info.block_count as usize, (postings.len() + 63) / 64);
        assert_eq!(info.min_doc_id, Some(0));
        assert_eq!(info.max_doc_id, Some(100_000 + 597));

        let segment = SegmentReader::open(fs.clone(), "s1").unwrap();
        assert_eq!(segment.block_count(), info.block_count as usize);
        assert_eq!(segment.doc_count(), info.doc_count);
        assert!(segment.contains_doc(100_000 + 597));
        assert!(segment.contains_doc(6));
        assert!(!segment.contains_doc(7));
        assert!(!segment.contains_doc(50_000));

        let deleted = RoaringBitmap::new();
        let mut reader = segment.reader(&deleted).unwrap();
        assert_eq!(read_all(&mut reader).unwrap(), postings);
    }

    #[test]
    fn test_empty_segment() {
        let (_tmp, fs) = setup();
        let info = SegmentWriter::new(8)
            .write(&*fs, "empty", &mut VecReader::new(Vec::new(), 8))
            .unwrap();
        assert_eq!(info.posting_count, 0);
        assert_eq!(info.min_doc_id, None);

        let segment = SegmentReader::open(fs, "empty").unwrap();
        assert_eq!(segment.doc_count(), 0);
        assert!(!segment.contains_doc(0));
        let deleted = RoaringBitmap::new();
        assert!(segment.reader(&deleted).unwrap().read_block().unwrap().is_none());
    }

    #[test]
    fn test_reader_for_terms() {
        let (_tmp, fs) = setup();
        let postings = sample_postings();
        SegmentWriter::new(16)
            .write(&*fs, "s1", &mut VecReader::new(postings.clone(), 50))
            .unwrap();
        let segment = SegmentReader::open(fs, "s1").unwrap();

        let terms = [3u32, 4, 300, 597, 10_000];
        let deleted = RoaringBitmap::new();
        let reader = segment.reader_for_terms(&terms, &deleted).unwrap();
        // 3 and 300 and 597 live in three distinct blocks
        assert_eq!(reader.selected.len(), 3);

        let mut reader = reader;
        let expected: Vec<_> = postings
            .iter()
            .filter(|p| terms.contains(&p.term))
            .copied()
            .collect();
        assert_eq!(read_all(&mut reader).unwrap(), expected);
    }

    #[test]
    fn test_deleted_documents_are_skipped() {
        let (_tmp, fs) = setup();
        let postings = vec![
            Posting::new(1, 10),
            Posting::new(1, 20),
            Posting::new(2, 10),
            Posting::new(3, 30),
        ];
        SegmentWriter::new(2)
            .write(&*fs, "s1", &mut VecReader::new(postings, 4))
            .unwrap();
        let segment = SegmentReader::open(fs, "s1").unwrap();

        let mut deleted = RoaringBitmap::new();
        deleted.insert(10);

        let mut reader = segment.reader(&deleted).unwrap();
        assert_eq!(
            read_all(&mut reader).unwrap(),
            vec![Posting::new(1, 20), Posting::new(3, 30)]
        );

        let terms = [1u32, 2];
        let mut reader = segment.reader_for_terms(&terms, &deleted).unwrap();
        assert_eq!(read_all(&mut reader).unwrap(), vec![Posting::new(1, 20)]);
    }

    #[test]
    fn test_rejects_unsorted_input() {
        let (_tmp, fs) = setup();
        let postings = vec![Posting::new(5, 1), Posting::new(2, 1)];
        let err = SegmentWriter::new(8)
            .write(&*fs, "bad", &mut VecReader::new(postings, 8))
            .unwrap_err();
        assert!(matches!(err, FpIndexError::Internal(_)));
        assert!(!fs.exists("bad"));
    }

    #[test]
    fn test_detects_corruption() {
        let (tmp, fs) = setup();
        SegmentWriter::new(4)
            .write(&*fs, "s1", &mut VecReader::new(sample_postings(), 10))
            .unwrap();

        let path = tmp.path().join("s1");
        let mut data = std::fs::read(&path).unwrap();
        // flip a byte inside the first block payload
        data[4 + BLOCK_HEADER_LEN] ^= 0xff;
        std::fs::write(&path, &data).unwrap();

        let segment = SegmentReader::open(fs.clone(), "s1").unwrap();
        let deleted = RoaringBitmap::new();
        let err = read_all(&mut segment.reader(&deleted).unwrap()).unwrap_err();
        assert!(matches!(err, FpIndexError::CorruptSegment(_)));

        std::fs::write(&path, &data[..data.len() - 3]).unwrap();
        assert!(matches!(
            SegmentReader::open(fs, "s1"),
            Err(FpIndexError::CorruptSegment(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_block_count() {
        let (tmp, fs) = setup();
        SegmentWriter::new(4)
            .write(&*fs, "s1", &mut VecReader::new(sample_postings(), 10))
            .unwrap();

        let path = tmp.path().join("s1");
        let mut data = std::fs::read(&path).unwrap();
        data[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        std::fs::write(&path, &data).unwrap();

        let segment = SegmentReader::open(fs, "s1").unwrap();
        let deleted = RoaringBitmap::new();
        let err = read_all(&mut segment.reader(&deleted).unwrap()).unwrap_err();
        assert!(matches!(err, FpIndexError::CorruptSegment(_)));

        assert!(matches!(
            decode_block(&[0x81, 0x81], 2),
            Err(FpIndexError::CorruptSegment(_))
        ));
        assert_eq!(decode_block(&[0x81, 0x82], 1).unwrap(), vec![Posting::new(1, 2)]);
    }
}
