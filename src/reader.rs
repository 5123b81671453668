use std::io::Cursor;

use binrw::{BinRead, Endian};

use crate::error::{LoadError, Result};

/// Little-endian cursor over a borrowed byte slice.
///
/// Shared by the PMD and PMX decoders. Fixed-layout records are decoded with
/// `binrw`; every `binrw` failure is reported as a [`LoadError::Parse`]
/// carrying the offset of the record that failed.
pub struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }

    /// True once every byte has been consumed. Optional trailing sections
    /// must check this before reading.
    pub fn is_end(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes exactly `magic.len()` bytes and compares them to `magic`.
    ///
    /// A short input or a different signature is a [`LoadError::Format`];
    /// nothing past the signature is touched.
    pub fn expect_magic(&mut self, magic: &[u8], format: &str) -> Result<()> {
        if self.remaining() < magic.len() {
            return Err(LoadError::Format(format!(
                "input too short for {format} signature"
            )));
        }
        let found = self.read_bytes(magic.len())?;
        if found != magic {
            return Err(LoadError::Format(format!(
                "expected {format} signature {:?}, found {:?}",
                String::from_utf8_lossy(magic),
                String::from_utf8_lossy(found)
            )));
        }
        Ok(())
    }

    /// Decodes one argument-free record.
    pub fn read<T>(&mut self) -> Result<T>
    where
        T: for<'b> BinRead<Args<'b> = ()>,
    {
        self.read_args(())
    }

    /// Decodes one record that needs import arguments (index widths, text encoding).
    pub fn read_args<T: BinRead>(&mut self, args: T::Args<'_>) -> Result<T> {
        let offset = self.cursor.position();
        T::read_options(&mut self.cursor, Endian::Little, args).map_err(|err| {
            let message = if err.is_eof() {
                format!("unexpected end of data reading {}", short_type_name::<T>())
            } else {
                err.to_string()
            };
            LoadError::Parse { offset, message }
        })
    }

    /// Returns the next `len` bytes without copying.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let end = start.checked_add(len).filter(|end| *end <= data.len());
        let Some(end) = end else {
            return Err(LoadError::Parse {
                offset: start as u64,
                message: format!("unexpected end of data reading {len} bytes"),
            });
        };
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    /// Reads a signed 32-bit table count.
    ///
    /// Negative counts, and counts whose records could not possibly fit in
    /// the remaining input, are rejected before anything is allocated.
    pub fn read_count(&mut self, table: &str, min_record_size: usize) -> Result<usize> {
        let offset = self.cursor.position();
        let count: i32 = self.read()?;
        let count = usize::try_from(count).map_err(|_| LoadError::Parse {
            offset,
            message: format!("negative {table} count {count}"),
        })?;
        self.check_count(table, offset, count, min_record_size)
    }

    /// Validates an unsigned count read by the caller.
    pub fn check_count(
        &self,
        table: &str,
        offset: u64,
        count: usize,
        min_record_size: usize,
    ) -> Result<usize> {
        let needed = count.saturating_mul(min_record_size);
        if needed > self.remaining() {
            return Err(LoadError::Parse {
                offset,
                message: format!(
                    "{table} count {count} exceeds remaining {} bytes",
                    self.remaining()
                ),
            });
        }
        Ok(count)
    }

    /// Reads `count` consecutive argument-free records.
    pub fn read_table<T>(&mut self, count: usize) -> Result<Vec<T>>
    where
        T: for<'b> BinRead<Args<'b> = ()>,
    {
        (0..count).map(|_| self.read()).collect()
    }
}

fn short_type_name<T>() -> &'static str {
    let name = std::any::type_name::<T>();
    name.rsplit("::").next().unwrap_or(name)
}
