use bytes::Bytes;

use super::{decode_integer, huffman, table, table::DynamicTable, DecoderError};
use crate::headers::{HeaderField, HeaderList};

/// The HPACK decoder. Owned by the reader task; header blocks are decoded
/// strictly in wire order because the dynamic table is shared across
/// streams.
#[derive(Debug)]
pub struct Decoder {
    dynamic: DynamicTable,
    /// Upper bound for in-block size updates: our committed
    /// SETTINGS_HEADER_TABLE_SIZE.
    max_size_limit: usize,
}

impl Decoder {
    pub fn new(max_table_size: usize) -> Decoder {
        Decoder {
            dynamic: DynamicTable::new(max_table_size),
            max_size_limit: max_table_size,
        }
    }

    /// Apply our committed SETTINGS_HEADER_TABLE_SIZE. The peer may choose
    /// any bound up to this via in-block size updates.
    pub fn set_max_size(&mut self, max_table_size: usize) {
        self.max_size_limit = max_table_size;
        if self.dynamic.max_size() > max_table_size {
            self.dynamic.set_max_size(max_table_size);
        }
    }

    /// Decode one complete header block.
    pub fn decode(&mut self, mut buf: &[u8]) -> Result<HeaderList, DecoderError> {
        let mut headers = HeaderList::new();
        let mut seen_field = false;

        while !buf.is_empty() {
            let first = buf[0];

            if first & 0x80 == 0x80 {
                // Indexed Header Field (§6.1)
                let (index, consumed) = decode_integer(buf, 7)?;
                buf = &buf[consumed..];
                let (name, value) = self.lookup(index)?;
                headers.push_field(HeaderField {
                    name,
                    value,
                    sensitive: false,
                });
                seen_field = true;
            } else if first & 0xc0 == 0x40 {
                // Literal with Incremental Indexing (§6.2.1)
                let (name, value, rest) = self.read_literal(buf, 6)?;
                buf = rest;
                self.dynamic.insert(name.to_vec(), value.to_vec());
                headers.push_field(HeaderField {
                    name: Bytes::from(name),
                    value: Bytes::from(value),
                    sensitive: false,
                });
                seen_field = true;
            } else if first & 0xe0 == 0x20 {
                // Dynamic Table Size Update (§6.3): only before the first
                // field of a block.
                let (size, consumed) = decode_integer(buf, 5)?;
                buf = &buf[consumed..];
                if seen_field || size > self.max_size_limit {
                    return Err(DecoderError::TableSizeExceeded);
                }
                self.dynamic.set_max_size(size);
            } else {
                // Literal without Indexing (§6.2.2) or Never Indexed
                // (§6.2.3); both use a 4-bit prefix.
                let sensitive = first & 0xf0 == 0x10;
                let (name, value, rest) = self.read_literal(buf, 4)?;
                buf = rest;
                headers.push_field(HeaderField {
                    name: Bytes::from(name),
                    value: Bytes::from(value),
                    sensitive,
                });
                seen_field = true;
            }
        }

        Ok(headers)
    }

    fn read_literal<'a>(
        &self,
        buf: &'a [u8],
        prefix_bits: u8,
    ) -> Result<(Vec<u8>, Vec<u8>, &'a [u8]), DecoderError> {
        let (name_index, consumed) = decode_integer(buf, prefix_bits)?;
        let mut rest = &buf[consumed..];

        let name = if name_index == 0 {
            let (name, after) = read_string(rest)?;
            rest = after;
            name
        } else {
            let (name, _) = self.lookup(name_index)?;
            name.to_vec()
        };

        let (value, rest) = read_string(rest)?;
        Ok((name, value, rest))
    }

    /// Resolve a 1-based index across the static then dynamic tables.
    fn lookup(&self, index: usize) -> Result<(Bytes, Bytes), DecoderError> {
        if let Some((name, value)) = table::static_entry(index) {
            return Ok((Bytes::from_static(name), Bytes::from_static(value)));
        }
        let dynamic_index = index
            .checked_sub(table::STATIC_TABLE_LEN + 1)
            .ok_or(DecoderError::InvalidIndex(index))?;
        let (name, value) = self
            .dynamic
            .get(dynamic_index)
            .ok_or(DecoderError::InvalidIndex(index))?;
        Ok((
            Bytes::copy_from_slice(name),
            Bytes::copy_from_slice(value),
        ))
    }
}

/// Read a String Literal (§5.2): H bit, 7-bit-prefix length, then octets.
fn read_string(buf: &[u8]) -> Result<(Vec<u8>, &[u8]), DecoderError> {
    if buf.is_empty() {
        return Err(DecoderError::UnexpectedEndOfBuffer);
    }
    let huffman_coded = buf[0] & 0x80 == 0x80;
    let (len, consumed) = decode_integer(buf, 7)?;
    let rest = &buf[consumed..];

    if rest.len() < len {
        return Err(DecoderError::UnexpectedEndOfBuffer);
    }
    let (raw, rest) = rest.split_at(len);

    let value = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };

    Ok((value, rest))
}
