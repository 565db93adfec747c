//! The type registry (consumed interface, spec §6): per-type layout
//! descriptors enumerating each managed type's field offsets and their
//! pointer/atomic kinds. Defining and populating the registry is out of
//! scope for this crate (spec §1); C7's marking work loop is the only
//! consumer defined here.

use crate::pointer::offset::OffsetWord;

/// The kind of a single field in a managed type's layout, as the type
/// registry reports it (spec §6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    StrongPtr,
    WeakPtr,
    ExternalPtr,
    AtomicStrongPtr,
    AtomicWeakPtr,
    /// A non-pointer field of the given byte size; the marker skips over
    /// it entirely.
    NonPtr(usize),
}

impl FieldKind {
    /// Whether the marker needs to follow this field at all.
    pub fn is_pointer(self) -> bool {
        !matches!(self, FieldKind::NonPtr(_))
    }

    /// Whether a referent reached through this field kind keeps it alive
    /// (weak fields do not contribute to reachability, spec §4.4/§4.5).
    pub fn keeps_alive(self) -> bool {
        matches!(
            self,
            FieldKind::StrongPtr | FieldKind::AtomicStrongPtr | FieldKind::ExternalPtr
        )
    }
}

/// One field in a type's layout: its byte offset from the object body start,
/// and its kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub field_offset: usize,
    pub field_kind: FieldKind,
}

/// Given a type descriptor offset, yields the ordered sequence of fields
/// C7 scans when tracing an object of that type (spec §6: "Type registry
/// interface").
pub trait TypeRegistry: Send + Sync {
    fn fields_of(&self, type_descriptor: OffsetWord) -> &[FieldDescriptor];
}

/// A registry backed by a simple lookup table, sufficient for tests and for
/// embedding a small, statically-known set of managed types.
pub struct StaticTypeRegistry {
    entries: Vec<(OffsetWord, Vec<FieldDescriptor>)>,
}

impl StaticTypeRegistry {
    pub fn new() -> Self {
        StaticTypeRegistry { entries: Vec::new() }
    }

    pub fn register(&mut self, type_descriptor: OffsetWord, fields: Vec<FieldDescriptor>) {
        self.entries.push((type_descriptor, fields));
    }
}

impl Default for StaticTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry for StaticTypeRegistry {
    fn fields_of(&self, type_descriptor: OffsetWord) -> &[FieldDescriptor] {
        self.entries
            .iter()
            .find(|(desc, _)| *desc == type_descriptor)
            .map(|(_, fields)| fields.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointer::offset::PointerKind;

    #[test]
    fn unregistered_type_has_no_fields() {
        let reg = StaticTypeRegistry::new();
        assert!(reg.fields_of(OffsetWord::new(8, PointerKind::Normal)).is_empty());
    }

    #[test]
    fn registered_type_reports_its_fields() {
        let mut reg = StaticTypeRegistry::new();
        let desc = OffsetWord::new(64, PointerKind::Normal);
        reg.register(
            desc,
            vec![
                FieldDescriptor { field_offset: 0, field_kind: FieldKind::StrongPtr },
                FieldDescriptor { field_offset: 8, field_kind: FieldKind::NonPtr(4) },
            ],
        );
        let fields = reg.fields_of(desc);
        assert_eq!(fields.len(), 2);
        assert!(fields[0].field_kind.is_pointer());
        assert!(!fields[1].field_kind.is_pointer());
    }

    #[test]
    fn keeps_alive_excludes_weak() {
        assert!(FieldKind::StrongPtr.keeps_alive());
        assert!(!FieldKind::WeakPtr.keeps_alive());
        assert!(!FieldKind::AtomicWeakPtr.keeps_alive());
    }
}
