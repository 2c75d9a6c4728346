/// String interning for names and string literals.
///
/// Every distinct byte string gets one `StringId`; ids are dense indices in
/// insertion order, so they double as stable keys for constant pools.
use indexmap::IndexSet;
use rustc_hash::FxBuildHasher;
use std::fmt;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct StringId(pub u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Default)]
pub struct StringInterner {
    strings: IndexSet<Box<[u8]>, FxBuildHasher>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            strings: IndexSet::with_hasher(FxBuildHasher),
        }
    }

    /// Intern a byte string. Returns the existing id if already present.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        if let Some(idx) = self.strings.get_index_of(bytes) {
            return StringId(idx as u32);
        }
        let (idx, _) = self.strings.insert_full(bytes.into());
        StringId(idx as u32)
    }

    /// Look up a string without interning it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        self.strings.get_index_of(bytes).map(|i| StringId(i as u32))
    }

    /// Bytes of an interned string. Unknown ids resolve to the empty string.
    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.strings.get_index(id.index()).map_or(&[][..], |b| &b[..])
    }

    /// Lossy UTF-8 rendering, for messages and listings.
    pub fn display(&self, id: StringId) -> String {
        String::from_utf8_lossy(self.get_bytes(id)).into_owned()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl fmt::Debug for StringInterner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strings.iter().map(|s| String::from_utf8_lossy(s)))
            .finish()
    }
}
