use bytes::Bytes;

use super::{encode_integer, huffman, table, table::DynamicTable};
use crate::headers::HeaderList;

/// The HPACK encoder. Owned by the writer task; header blocks are encoded
/// in exactly the order they are written to the wire.
#[derive(Debug)]
pub struct Encoder {
    dynamic: DynamicTable,
    use_huffman: bool,
    /// A lowered table bound from the peer is signalled with a Dynamic Table
    /// Size Update at the front of the next block.
    pending_size_update: Option<usize>,
}

impl Encoder {
    pub fn new(max_table_size: usize) -> Encoder {
        Encoder {
            dynamic: DynamicTable::new(max_table_size),
            use_huffman: true,
            pending_size_update: None,
        }
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn update_max_size(&mut self, max_table_size: usize) {
        if max_table_size != self.dynamic.max_size() {
            self.pending_size_update = Some(max_table_size);
            self.dynamic.set_max_size(max_table_size);
        }
    }

    pub fn set_huffman(&mut self, enabled: bool) {
        self.use_huffman = enabled;
    }

    /// Encode one complete header block.
    pub fn encode(&mut self, headers: &HeaderList) -> Bytes {
        let mut buf = Vec::with_capacity(headers.len() * 32);

        if let Some(size) = self.pending_size_update.take() {
            // Dynamic Table Size Update (§6.3)
            encode_integer(&mut buf, size, 5, 0x20);
        }

        for field in headers {
            if field.sensitive {
                self.encode_never_indexed(&mut buf, &field.name, &field.value);
            } else {
                self.encode_field(&mut buf, &field.name, &field.value);
            }
        }

        Bytes::from(buf)
    }

    fn encode_field(&mut self, buf: &mut Vec<u8>, name: &[u8], value: &[u8]) {
        if let Some(index) = self.find(name, value) {
            // Indexed Header Field (§6.1)
            encode_integer(buf, index, 7, 0x80);
            return;
        }

        // Literal Header Field with Incremental Indexing (§6.2.1)
        match self.find_name(name) {
            Some(index) => encode_integer(buf, index, 6, 0x40),
            None => {
                buf.push(0x40);
                self.encode_string(buf, name);
            }
        }
        self.encode_string(buf, value);

        self.dynamic.insert(name.to_vec(), value.to_vec());
    }

    /// Literal Header Field Never Indexed (§6.2.3).
    fn encode_never_indexed(&mut self, buf: &mut Vec<u8>, name: &[u8], value: &[u8]) {
        match self.find_name(name) {
            Some(index) => encode_integer(buf, index, 4, 0x10),
            None => {
                buf.push(0x10);
                self.encode_string(buf, name);
            }
        }
        self.encode_string(buf, value);
    }

    fn find(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        table::static_find(name, value)
            .or_else(|| self.dynamic.find(name, value).map(|i| table::STATIC_TABLE_LEN + 1 + i))
    }

    fn find_name(&self, name: &[u8]) -> Option<usize> {
        table::static_find_name(name)
            .or_else(|| self.dynamic.find_name(name).map(|i| table::STATIC_TABLE_LEN + 1 + i))
    }

    /// String Literal (§5.2), Huffman coded when that is shorter.
    fn encode_string(&self, buf: &mut Vec<u8>, s: &[u8]) {
        if self.use_huffman {
            let huffman_len = huffman::encoded_len(s);
            if huffman_len < s.len() {
                encode_integer(buf, huffman_len, 7, 0x80);
                buf.extend_from_slice(&huffman::encode(s));
                return;
            }
        }

        encode_integer(buf, s.len(), 7, 0x00);
        buf.extend_from_slice(s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(fields: &[(&[u8], &[u8])]) -> HeaderList {
        let mut headers = HeaderList::new();
        for &(name, value) in fields {
            headers.push(name, value);
        }
        headers
    }

    #[test]
    fn static_matches_use_single_octet_indexes() {
        let mut encoder = Encoder::new(4096);
        let block = encoder.encode(&list(&[(b":method", b"GET"), (b":path", b"/")]));
        assert_eq!(block.as_ref(), [0x82, 0x84]);
    }

    #[test]
    fn repeated_custom_field_hits_dynamic_table() {
        let mut encoder = Encoder::new(4096);
        let headers = list(&[(b"x-trace-id", b"abc123")]);

        let first = encoder.encode(&headers);
        // Literal with incremental indexing, new name
        assert_eq!(first[0] & 0xc0, 0x40);

        let second = encoder.encode(&headers);
        // Fully indexed against the dynamic table: static len + 1
        assert_eq!(second.as_ref(), [0x80 | 62]);
    }

    #[test]
    fn sensitive_fields_are_never_indexed() {
        let mut encoder = Encoder::new(4096);
        let mut headers = HeaderList::new();
        headers.push_sensitive(b"authorization", b"Bearer shhh");

        let first = encoder.encode(&headers);
        assert_eq!(first[0] & 0xf0, 0x10);

        // And nothing entered the dynamic table.
        let second = encoder.encode(&headers);
        assert_eq!(second[0] & 0xf0, 0x10);
    }

    #[test]
    fn lowered_bound_emits_size_update() {
        let mut encoder = Encoder::new(4096);
        encoder.update_max_size(0);
        let block = encoder.encode(&list(&[(b":method", b"GET")]));
        // 0x20 = size update to 0, then indexed :method GET
        assert_eq!(block.as_ref(), [0x20, 0x82]);
    }
}
