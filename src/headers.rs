use bytes::Bytes;
use http::StatusCode;

/// One header field: a name/value pair in its exact wire position.
///
/// Sensitive fields are encoded never-indexed so intermediaries cannot
/// recover them from compression state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Bytes,
    pub value: Bytes,
    pub sensitive: bool,
}

/// An ordered header list.
///
/// HPACK is order-sensitive (the dynamic table is mutated field by field),
/// so unlike a multimap this type preserves the exact sequence of fields,
/// pseudo-headers included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    fields: Vec<HeaderField>,
}

impl HeaderList {
    pub fn new() -> HeaderList {
        HeaderList::default()
    }

    /// The request pseudo-header block: `:method`, `:scheme`, `:authority`,
    /// `:path`, in that order. Accepts `http::Method` or plain strings.
    pub fn request<M>(method: M, scheme: &str, authority: &str, path: &str) -> HeaderList
    where
        M: AsRef<str>,
    {
        let mut list = HeaderList::new();
        list.push(b":method", method.as_ref().as_bytes());
        list.push(b":scheme", scheme.as_bytes());
        list.push(b":authority", authority.as_bytes());
        list.push(b":path", path.as_bytes());
        list
    }

    pub fn push(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        self.fields.push(HeaderField {
            name: Bytes::copy_from_slice(name.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            sensitive: false,
        });
        self
    }

    /// Append a field that must never enter a compression table
    /// (authorization tokens, cookies with secrets).
    pub fn push_sensitive(&mut self, name: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        self.fields.push(HeaderField {
            name: Bytes::copy_from_slice(name.as_ref()),
            value: Bytes::copy_from_slice(value.as_ref()),
            sensitive: true,
        });
        self
    }

    pub(crate) fn push_field(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: impl AsRef<[u8]>) -> Option<&Bytes> {
        let name = name.as_ref();
        self.fields
            .iter()
            .find(|f| f.name.as_ref() == name)
            .map(|f| &f.value)
    }

    /// The `:status` pseudo-header of a response block.
    pub fn status(&self) -> Option<StatusCode> {
        let raw = self.get(b":status")?;
        StatusCode::from_bytes(raw).ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Uncompressed size as defined for SETTINGS_MAX_HEADER_LIST_SIZE:
    /// name + value + 32 octets of overhead per field.
    pub fn wire_size(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.name.len() + f.value.len() + 32)
            .sum()
    }
}

impl<'a> IntoIterator for &'a HeaderList {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
