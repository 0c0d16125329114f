// SPDX-License-Identifier: MIT

use std::io::{Error, Read, Seek, SeekFrom, Write};

use crate::{OpalIO, OpalIOError, OpalIOResult, OpalIOSetLen};

/// `OpalIO` over any `Read + Write + Seek` stream (files, cursors).
///
/// Owns the stream for the lifetime of the wrapper; `into_inner`
/// releases it.
#[derive(Debug)]
pub struct StdOpalIO<T: Read + Write + Seek> {
    io: T,
}

impl<T: Read + Write + Seek> StdOpalIO<T> {
    #[inline]
    pub fn new(io: T) -> Self {
        Self { io }
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.io
    }
}

impl<T: Read + Write + Seek> OpalIO for StdOpalIO<T> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> OpalIOResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> OpalIOResult {
        self.io.seek(SeekFrom::Start(offset))?;
        self.io.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> OpalIOResult {
        self.io.flush()?;
        Ok(())
    }

    fn len(&mut self) -> OpalIOResult<u64> {
        let len = self.io.seek(SeekFrom::End(0))?;
        Ok(len)
    }
}

impl OpalIOSetLen for StdOpalIO<std::fs::File> {
    fn set_len(&mut self, len: u64) -> OpalIOResult {
        self.io.set_len(len)?;
        self.flush()?;
        self.io.seek(SeekFrom::Start(0))?;
        Ok(())
    }
}

impl From<Error> for OpalIOError {
    #[cold]
    #[inline(never)]
    fn from(e: Error) -> Self {
        // Leak the string to produce a 'static str. Acceptable for error mapping.
        let leaked_str: &'static str = Box::leak(e.to_string().into_boxed_str());
        OpalIOError::Error(leaked_str)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::prelude::*;
    use tempfile::tempfile;

    #[test]
    fn test_rw() {
        let file = tempfile().unwrap();
        let mut io = StdOpalIO::new(file);
        io.write_at(10, &[1, 2, 3, 4]).unwrap();

        let mut output = [0u8; 4];
        io.read_at(10, &mut output).unwrap();
        assert_eq!(output, [1, 2, 3, 4]);
    }

    #[test]
    fn test_len() {
        let file = tempfile().unwrap();
        let mut io = StdOpalIO::new(file);
        io.write_at(0, &[0u8; 512]).unwrap();
        assert_eq!(io.len().unwrap(), 512);
    }

    #[test]
    fn test_set_len() {
        let file = tempfile().unwrap();
        let mut io = StdOpalIO::new(file);
        io.set_len(2048).unwrap();
        assert_eq!(io.len().unwrap(), 2048);
    }

    #[test]
    fn test_copy_from_mem() {
        let mut src = MemOpalIO::from_vec(vec![0x5A; 4096]);
        let file = tempfile().unwrap();
        let mut io = StdOpalIO::new(file);

        io.copy_from(&mut src, 0, 0, 4096).unwrap();

        let mut back = vec![0u8; 4096];
        io.read_at(0, &mut back).unwrap();
        assert!(back.iter().all(|&b| b == 0x5A));
    }
}
