//! Recipe files: tagged records describing how to rebuild an image
//!
//! A recipe is a flat sequence of records. Each record is a three-byte
//! ASCII tag followed by either a fixed-size little-endian scalar or a
//! `u32` length and that many bytes. The tag alone decides which form
//! follows, so writer and reader share the table in [`Tag`].

use crate::error::{BootImgError, Result};
use crate::params::BuildParams;
use crate::{BOOT_ARGS_SIZE, BOOT_EXTRA_ARGS_SIZE, BOOT_ID_WORDS, BOOT_NAME_SIZE, MAX_FILENAME_LEN};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Default recipe filename, written next to the extracted segments
pub const RECIPE_FILE_NAME: &str = "recipe.cfg";

/// Length of a record tag
pub const TAG_LEN: usize = 3;

/// Every field a recipe can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    KernelName,
    KernelAddr,
    RamdiskName,
    RamdiskAddr,
    SecondName,
    SecondAddr,
    TagsAddr,
    PageSize,
    HeaderVersion,
    OsVersion,
    ProductName,
    Cmdline,
    ExtraCmdline,
    Id,
    RecoveryDtboOffset,
    RecoveryDtboName,
    DtbAddr,
    DtbName,
}

/// How a record's payload is framed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    U32,
    U64,
    /// Eight little-endian `u32` words
    Id,
    /// `u32` length followed by at most `max` bytes
    Bytes { max: usize },
}

impl Payload {
    /// Size of the payload when it is not length-prefixed
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Payload::U32 => Some(4),
            Payload::U64 => Some(8),
            Payload::Id => Some(BOOT_ID_WORDS * 4),
            Payload::Bytes { .. } => None,
        }
    }
}

impl Tag {
    pub const ALL: [Tag; 18] = [
        Tag::KernelName,
        Tag::KernelAddr,
        Tag::RamdiskName,
        Tag::RamdiskAddr,
        Tag::SecondName,
        Tag::SecondAddr,
        Tag::TagsAddr,
        Tag::PageSize,
        Tag::HeaderVersion,
        Tag::OsVersion,
        Tag::ProductName,
        Tag::Cmdline,
        Tag::ExtraCmdline,
        Tag::Id,
        Tag::RecoveryDtboOffset,
        Tag::RecoveryDtboName,
        Tag::DtbAddr,
        Tag::DtbName,
    ];

    /// Three-byte code written to the file
    pub fn code(self) -> &'static [u8; TAG_LEN] {
        match self {
            Tag::KernelName => b"knn",
            Tag::KernelAddr => b"kna",
            Tag::RamdiskName => b"rdn",
            Tag::RamdiskAddr => b"rda",
            Tag::SecondName => b"sen",
            Tag::SecondAddr => b"sea",
            Tag::TagsAddr => b"taa",
            Tag::PageSize => b"pas",
            Tag::HeaderVersion => b"hev",
            Tag::OsVersion => b"osv",
            Tag::ProductName => b"pna",
            Tag::Cmdline => b"cmd",
            Tag::ExtraCmdline => b"ecm",
            Tag::Id => b"idv",
            Tag::RecoveryDtboOffset => b"reo",
            Tag::RecoveryDtboName => b"ren",
            Tag::DtbAddr => b"dta",
            Tag::DtbName => b"dtn",
        }
    }

    pub fn from_code(code: &[u8; TAG_LEN]) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.code() == code)
    }

    /// Tag code as text, for messages
    pub fn name(self) -> &'static str {
        // codes are ASCII literals
        std::str::from_utf8(self.code()).unwrap_or("???")
    }

    pub fn payload(self) -> Payload {
        match self {
            Tag::KernelAddr
            | Tag::RamdiskAddr
            | Tag::SecondAddr
            | Tag::TagsAddr
            | Tag::PageSize
            | Tag::HeaderVersion
            | Tag::OsVersion => Payload::U32,
            Tag::RecoveryDtboOffset | Tag::DtbAddr => Payload::U64,
            Tag::Id => Payload::Id,
            Tag::KernelName
            | Tag::RamdiskName
            | Tag::SecondName
            | Tag::RecoveryDtboName
            | Tag::DtbName => Payload::Bytes {
                max: MAX_FILENAME_LEN,
            },
            Tag::ProductName => Payload::Bytes {
                max: BOOT_NAME_SIZE,
            },
            Tag::Cmdline => Payload::Bytes {
                max: BOOT_ARGS_SIZE,
            },
            Tag::ExtraCmdline => Payload::Bytes {
                max: BOOT_EXTRA_ARGS_SIZE,
            },
        }
    }
}

/// Decoded record payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U32(u32),
    U64(u64),
    Id([u32; BOOT_ID_WORDS]),
    Bytes(Vec<u8>),
}

impl Value {
    fn matches(&self, payload: Payload) -> bool {
        matches!(
            (self, payload),
            (Value::U32(_), Payload::U32)
                | (Value::U64(_), Payload::U64)
                | (Value::Id(_), Payload::Id)
                | (Value::Bytes(_), Payload::Bytes { .. })
        )
    }
}

/// One tag and its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tag: Tag,
    pub value: Value,
}

impl Record {
    /// Create a record, checking the value against the tag's payload kind
    pub fn new(tag: Tag, value: Value) -> Result<Self> {
        let record = Self { tag, value };
        record.check()?;
        Ok(record)
    }

    /// Check the value kind and length limit against the tag table
    pub fn check(&self) -> Result<()> {
        let payload = self.tag.payload();
        if !self.value.matches(payload) {
            return Err(BootImgError::InvalidRecipeValue {
                tag: self.tag.name(),
                reason: format!("{:?} does not fit payload {:?}", self.value, payload),
            });
        }
        if let (Value::Bytes(bytes), Payload::Bytes { max }) = (&self.value, payload)
            && bytes.len() > max
        {
            return Err(BootImgError::FieldTooLong {
                field: self.tag.name(),
                len: bytes.len(),
                max,
            });
        }
        Ok(())
    }

    pub fn u32(tag: Tag, value: u32) -> Result<Self> {
        Self::new(tag, Value::U32(value))
    }

    pub fn u64(tag: Tag, value: u64) -> Result<Self> {
        Self::new(tag, Value::U64(value))
    }

    pub fn bytes(tag: Tag, value: impl Into<Vec<u8>>) -> Result<Self> {
        Self::new(tag, Value::Bytes(value.into()))
    }
}

/// Write a single record
pub fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<()> {
    record.check()?;

    writer.write_all(record.tag.code())?;
    match &record.value {
        Value::U32(v) => writer.write_u32::<LittleEndian>(*v)?,
        Value::U64(v) => writer.write_u64::<LittleEndian>(*v)?,
        Value::Id(words) => {
            for word in words {
                writer.write_u32::<LittleEndian>(*word)?;
            }
        }
        Value::Bytes(bytes) => {
            let len = u32::try_from(bytes.len()).map_err(|_| BootImgError::FieldTooLong {
                field: record.tag.name(),
                len: bytes.len(),
                max: u32::MAX as usize,
            })?;
            writer.write_u32::<LittleEndian>(len)?;
            writer.write_all(bytes)?;
        }
    }
    Ok(())
}

/// Streaming reader over the records of a recipe
///
/// Yields records until the stream ends on a record boundary. An unknown
/// tag or a payload cut short by end of stream ends iteration with an
/// error.
pub struct RecordReader<R> {
    reader: R,
    offset: u64,
    failed: bool,
}

/// Read records from `reader`
pub fn read_records<R: Read>(reader: R) -> RecordReader<R> {
    RecordReader {
        reader,
        offset: 0,
        failed: false,
    }
}

impl<R: Read> RecordReader<R> {
    /// Byte offset of the next unread record
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill `buf` as far as the stream allows, returning the bytes read
    fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }

    fn read_payload(&mut self, tag: Tag, start: u64) -> Result<Value> {
        let truncated = |e: std::io::Error| {
            if e.kind() == ErrorKind::UnexpectedEof {
                BootImgError::TruncatedRecipe {
                    tag: tag.name(),
                    offset: start,
                }
            } else {
                BootImgError::Io(e)
            }
        };

        let value = match tag.payload() {
            Payload::U32 => Value::U32(self.reader.read_u32::<LittleEndian>().map_err(truncated)?),
            Payload::U64 => Value::U64(self.reader.read_u64::<LittleEndian>().map_err(truncated)?),
            Payload::Id => {
                let mut words = [0u32; BOOT_ID_WORDS];
                self.reader
                    .read_u32_into::<LittleEndian>(&mut words)
                    .map_err(truncated)?;
                Value::Id(words)
            }
            Payload::Bytes { max } => {
                let len = self.reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
                if len > max {
                    return Err(BootImgError::FieldTooLong {
                        field: tag.name(),
                        len,
                        max,
                    });
                }
                let mut bytes = vec![0u8; len];
                self.reader.read_exact(&mut bytes).map_err(truncated)?;
                self.offset += 4;
                Value::Bytes(bytes)
            }
        };

        self.offset += match &value {
            Value::Bytes(bytes) => bytes.len() as u64,
            _ => tag.payload().fixed_size().unwrap_or(0) as u64,
        };
        Ok(value)
    }

    fn next_record(&mut self) -> Result<Option<Record>> {
        let start = self.offset;
        let mut code = [0u8; TAG_LEN];
        let got = self.read_up_to(&mut code)?;
        if got < TAG_LEN {
            // a short tag read at end of stream ends the recipe
            if got > 0 {
                log::debug!("ignoring {got} trailing bytes at offset {start}");
            }
            return Ok(None);
        }
        self.offset += TAG_LEN as u64;

        let tag = Tag::from_code(&code).ok_or_else(|| BootImgError::UnknownRecipeTag {
            tag: String::from_utf8_lossy(&code).into_owned(),
            offset: start,
        })?;

        let value = self.read_payload(tag, start)?;
        log::debug!("recipe record '{}' at offset {}", tag.name(), start);
        Ok(Some(Record { tag, value }))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Ordered list of records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    records: Vec<Record>,
}

impl Recipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// First record carrying `tag`
    pub fn get(&self, tag: Tag) -> Option<&Value> {
        self.records
            .iter()
            .find(|record| record.tag == tag)
            .map(|record| &record.value)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        for record in &self.records {
            write_record(writer, record)?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.write_to(&mut buffer)?;
        Ok(buffer)
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let records = read_records(reader).collect::<Result<Vec<_>>>()?;
        Ok(Self { records })
    }

    /// Load a recipe file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| BootImgError::file_io(path, e))?;
        Self::read_from(BufReader::new(file)).map_err(|e| match e {
            BootImgError::Io(source) => BootImgError::file_io(path, source),
            other => other,
        })
    }

    /// Write the recipe to `path`, replacing any existing file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|e| BootImgError::file_io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush().map_err(|e| BootImgError::file_io(path, e))?;
        Ok(())
    }

    /// Fold the records into build parameters, later records winning
    pub fn to_params(&self) -> Result<BuildParams> {
        self.records
            .iter()
            .cloned()
            .try_fold(BuildParams::zeroed(), BuildParams::apply)
    }
}

impl FromIterator<Record> for Recipe {
    fn from_iter<T: IntoIterator<Item = Record>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}
