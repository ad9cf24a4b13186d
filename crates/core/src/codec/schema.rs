//! Schema-directed codec.
//!
//! Each table that may be loaded declares its fields: type, in-memory offset
//! and element count. On disk the fields are packed in declaration order,
//! big-endian, with no padding. In memory each element sits at its declared
//! offset in native byte order; bytes not covered by any field are left alone.
//!
//! The table header is `offset: u32`, `num_bytes: u32`, `name_len: u16` and
//! the name bytes, all big-endian. Offsets in the header are in encoded space,
//! so partial loads are applied to an encoded copy of the table and then
//! decoded as a whole.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use flight_tables_types::TABLE_NAME_FIELD_LEN;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::{LoadHeader, TableCodec, read_fully};
use crate::error::{
    AccessSnafu, ExternalResourceFailSnafu, InvalidSizeSnafu, NoTblHeaderSnafu, Result,
};

/// Primitive field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// `u8`
    U8,
    /// `i8`
    I8,
    /// `u16`
    U16,
    /// `i16`
    I16,
    /// `u32`
    U32,
    /// `i32`
    I32,
    /// `u64`
    U64,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
}

impl FieldKind {
    /// Width in bytes.
    pub const fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }
}

fn one() -> usize {
    1
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, for diagnostics.
    pub name: String,
    /// Element type.
    pub kind: FieldKind,
    /// Byte offset of the first element in memory.
    pub offset: usize,
    /// Number of consecutive elements.
    #[serde(default = "one")]
    pub count: usize,
}

impl FieldSpec {
    fn memory_len(&self) -> usize {
        self.kind.width() * self.count
    }
}

/// Declared layout of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Qualified table name.
    pub table: String,
    /// In-memory size; must equal the registered size.
    pub size: usize,
    /// Fields in on-disk order.
    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    /// Packed on-disk size.
    pub fn encoded_size(&self) -> usize {
        self.fields.iter().map(FieldSpec::memory_len).sum()
    }

    fn check(&self) -> Result<()> {
        for field in &self.fields {
            if field.count == 0 || field.offset + field.memory_len() > self.size {
                return ExternalResourceFailSnafu {
                    message: format!("field {} of {} lies outside the table", field.name, self.table),
                }
                .fail();
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    tables: Vec<TableSchema>,
}

/// Codec driven by [`TableSchema`] declarations.
#[derive(Debug, Default, Clone)]
pub struct SchemaCodec {
    schemas: HashMap<String, TableSchema>,
}

impl SchemaCodec {
    /// Creates a codec for the given tables.
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self { schemas: schemas.into_iter().map(|s| (s.table.clone(), s)).collect() }
    }

    /// Parses a TOML document with a `[[tables]]` array.
    ///
    /// # Errors
    ///
    /// Returns `ExternalResourceFail` if the document does not parse.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(text)
            .map_err(|e| ExternalResourceFailSnafu { message: format!("schema parse failed: {e}") }.build())?;
        Ok(Self::new(file.tables))
    }

    /// Reads and parses a schema file.
    ///
    /// # Errors
    ///
    /// Returns `Access` if the file cannot be read, or `ExternalResourceFail`
    /// if it does not parse.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).context(AccessSnafu { path: path.display().to_string() })?;
        Self::from_toml_str(&text)
    }

    /// Schema for `table`, if declared.
    pub fn schema(&self, table: &str) -> Option<&TableSchema> {
        self.schemas.get(table)
    }

    fn require(&self, table: &str) -> Result<&TableSchema> {
        self.schemas
            .get(table)
            .ok_or_else(|| ExternalResourceFailSnafu { message: format!("no schema declared for {table}") }.build())
    }
}

/// Copies `width` bytes, reversing them when host and disk order differ.
fn swap_copy(dst: &mut [u8], src: &[u8]) {
    dst.copy_from_slice(src);
    if cfg!(target_endian = "little") {
        dst.reverse();
    }
}

impl TableCodec for SchemaCodec {
    fn name(&self) -> &'static str {
        "schema"
    }

    fn validate_config(&self, table: &str, size: usize) -> Result<()> {
        let schema = self.require(table)?;
        if schema.size != size {
            return InvalidSizeSnafu { size, max: schema.size }.fail();
        }
        schema.check()
    }

    fn encoded_size(&self, table: &str, size: usize) -> usize {
        self.schemas.get(table).map_or(size, TableSchema::encoded_size)
    }

    fn decode_header(&self, reader: &mut dyn Read, path: &str) -> Result<LoadHeader> {
        let mut fixed = [0u8; 10];
        let read = read_fully(reader, &mut fixed).context(AccessSnafu { path })?;
        if read < fixed.len() {
            return NoTblHeaderSnafu { path }.fail();
        }
        let offset = u32::from_be_bytes([fixed[0], fixed[1], fixed[2], fixed[3]]);
        let num_bytes = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
        let name_len = usize::from(u16::from_be_bytes([fixed[8], fixed[9]]));
        if name_len == 0 || name_len >= TABLE_NAME_FIELD_LEN {
            return NoTblHeaderSnafu { path }.fail();
        }
        let mut name = vec![0u8; name_len];
        let read = read_fully(reader, &mut name).context(AccessSnafu { path })?;
        if read < name_len {
            return NoTblHeaderSnafu { path }.fail();
        }
        let table_name = String::from_utf8(name).map_err(|_| NoTblHeaderSnafu { path }.build())?;
        Ok(LoadHeader { table_name, offset, num_bytes })
    }

    fn encode_header(&self, table: &str, offset: u32, num_bytes: u32) -> Vec<u8> {
        let name = &table.as_bytes()[..table.len().min(TABLE_NAME_FIELD_LEN - 1)];
        let mut out = Vec::with_capacity(10 + name.len());
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&num_bytes.to_be_bytes());
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out
    }

    fn decode_input(&self, table: &str, src: &[u8], dst: &mut [u8]) -> Result<()> {
        let schema = self.require(table)?;
        if src.len() < schema.encoded_size() || dst.len() < schema.size {
            return ExternalResourceFailSnafu {
                message: format!("{table}: {} encoded bytes for {} expected", src.len(), schema.encoded_size()),
            }
            .fail();
        }
        let mut pos = 0;
        for field in &schema.fields {
            let width = field.kind.width();
            for i in 0..field.count {
                let at = field.offset + i * width;
                swap_copy(&mut dst[at..at + width], &src[pos..pos + width]);
                pos += width;
            }
        }
        Ok(())
    }

    fn encode_output(&self, table: &str, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let schema = self.require(table)?;
        let encoded = schema.encoded_size();
        if dst.len() < encoded || src.len() < schema.size {
            return ExternalResourceFailSnafu {
                message: format!("{table}: {} byte buffer cannot hold {encoded} encoded bytes", dst.len()),
            }
            .fail();
        }
        let mut pos = 0;
        for field in &schema.fields {
            let width = field.kind.width();
            for i in 0..field.count {
                let at = field.offset + i * width;
                swap_copy(&mut dst[pos..pos + width], &src[at..at + width]);
                pos += width;
            }
        }
        Ok(encoded)
    }

    fn needs_scratch_buffer(&self) -> bool {
        true
    }
}
