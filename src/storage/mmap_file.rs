use std::fs::File;
use std::path::Path;
use memmap2::{Mmap, MmapOptions};
use crate::core::error::Result;

/// Read-only memory-mapped file for zero-copy reads. Empty files map to an
/// empty slice instead of an mmap of length zero, which some platforms
/// reject.
pub struct MmapFile {
    mmap: Option<Mmap>,
    len: usize,
}

impl MmapFile {
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        let len = file.metadata()?.len() as usize;

        if len == 0 {
            return Ok(MmapFile { mmap: None, len: 0 });
        }

        let mmap = unsafe { MmapOptions::new().len(len).map(&file)? };
        Ok(MmapFile {
            mmap: Some(mmap),
            len,
        })
    }

    pub fn empty() -> Self {
        MmapFile { mmap: None, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data(&self) -> &[u8] {
        match &self.mmap {
            Some(mmap) => &mmap[..],
            None => &[],
        }
    }
}
