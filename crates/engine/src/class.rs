//! Class metadata: field layout, single inheritance, and virtual dispatch.

use crate::types::{Type, POINTER_SIZE};
use rustc_hash::FxHashMap;
use std::cell::Cell;

/// Header size in bytes, exactly as specified: 8-byte type-descriptor
/// pointer plus 1 byte of GC info, rounded to 8-byte alignment so that
/// fields begin on an 8-byte boundary. See `gc::header`.
pub const OBJECT_HEADER_SIZE: usize = 16;

/// Extra bytes appended after the header for array objects: a 4-byte
/// length, padded to 8 for alignment of the element data that follows.
pub const ARRAY_LENGTH_FIELD_SIZE: usize = 4;
pub const ARRAY_DATA_OFFSET: usize = OBJECT_HEADER_SIZE + 8;

/// Offset of the 4-byte total-object-size field within the header, carried
/// in bytes otherwise left as alignment padding after the GC-info byte.
/// `gc::heap::HeapWalker` reads this to step from one object to the next,
/// since arrays and class instances are not all the same size (§4.9).
pub const OBJECT_SIZE_FIELD_OFFSET: usize = 12;

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct VirtualSlot {
    pub signature: String,
    pub slot: usize,
}

/// A loaded class's layout and dispatch table. Classes form a single-
/// inheritance tree; every chain terminates at a root "Object" class with
/// no parent and no fields (§3 invariant).
#[derive(Debug, Clone)]
pub struct ClassMetadata {
    pub name: String,
    pub parent: Option<String>,
    pub fields: Vec<Field>,
    pub total_size: usize,
    pub field_offsets: FxHashMap<String, usize>,
    pub vtable: Vec<VirtualSlot>,
    /// This class's own copy of the dispatch table: `vtable_entries[slot]`
    /// holds the compiled entry point for whichever signature `vtable[slot]`
    /// names. A subclass keeps its own array even for an inherited, not
    /// overridden, slot, so loading `[type_descriptor + slot*8]` off an
    /// object's header always calls the version that class actually has
    /// (§4.6 CallVirtual). Populated by `runtime::VMState::link_vtables`
    /// once every function is loaded; `0` until then.
    pub vtable_entries: Vec<Cell<i64>>,
}

impl ClassMetadata {
    /// Builds layout for a class given its own declared fields/virtual
    /// methods and its already-laid-out parent (`None` for the root).
    ///
    /// Field offsets pack the parent's fields first, then this class's own
    /// fields in declaration order, starting right after the object header.
    /// The vtable is the parent's vtable with this class's own virtual
    /// methods appended in declaration order; an overriding method (same
    /// unqualified name + parameter list as a parent entry) reuses the
    /// parent's slot instead of appending (§3 ClassMetadata, vtable policy).
    pub fn build(
        name: String,
        parent: Option<&ClassMetadata>,
        own_fields: Vec<(String, Type)>,
        own_virtual_signatures: Vec<String>,
    ) -> ClassMetadata {
        let mut fields = Vec::new();
        let mut field_offsets = FxHashMap::default();
        let mut offset = parent.map(|p| p.total_size).unwrap_or(OBJECT_HEADER_SIZE);

        if let Some(p) = parent {
            fields.extend(p.fields.iter().cloned());
            field_offsets.extend(p.field_offsets.iter().map(|(k, v)| (k.clone(), *v)));
        }

        for (field_name, ty) in own_fields {
            let size = ty.size();
            fields.push(Field {
                name: field_name.clone(),
                ty,
                offset,
            });
            field_offsets.insert(field_name, offset);
            offset += size;
        }

        let mut vtable: Vec<VirtualSlot> = parent.map(|p| p.vtable.clone()).unwrap_or_default();
        for signature in own_virtual_signatures {
            let unqualified = unqualified_member(&signature);
            if let Some(existing) = vtable
                .iter_mut()
                .find(|slot| unqualified_member(&slot.signature) == unqualified)
            {
                existing.signature = signature;
            } else {
                let slot = vtable.len();
                vtable.push(VirtualSlot { signature, slot });
            }
        }

        let vtable_entries = vtable.iter().map(|_| Cell::new(0)).collect();

        ClassMetadata {
            name,
            parent: parent.map(|p| p.name.clone()),
            fields,
            total_size: offset,
            field_offsets,
            vtable,
            vtable_entries,
        }
    }

    pub fn field_offset(&self, field: &str) -> Option<usize> {
        self.field_offsets.get(field).copied()
    }

    pub fn vtable_slot(&self, signature: &str) -> Option<usize> {
        let unqualified = unqualified_member(signature);
        self.vtable
            .iter()
            .find(|slot| unqualified_member(&slot.signature) == unqualified)
            .map(|slot| slot.slot)
    }

    /// Address of this class's own `vtable_entries` array, written into an
    /// object's type-descriptor slot at construction time so `CallVirtual`
    /// can load `[vtable_base + slot*8]` (§4.6).
    pub fn vtable_base(&self) -> i64 {
        self.vtable_entries.as_ptr() as i64
    }
}

/// Strips the `Class::` qualifier and keeps `member(params)`, so that
/// overrides in subclasses match their parent's declaration by shape.
fn unqualified_member(signature: &str) -> &str {
    match signature.split_once("::") {
        Some((_, rest)) => rest,
        None => signature,
    }
}

/// Computes the byte offset of array element `index` for an element of
/// size `elem_size`, relative to the object's base address (§4.6 LOAD_ELEMENT).
pub fn array_element_offset(index: i64, elem_size: usize) -> i64 {
    ARRAY_DATA_OFFSET as i64 + index * elem_size as i64
}

pub fn pointer_size() -> usize {
    POINTER_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> ClassMetadata {
        ClassMetadata::build("Object".into(), None, vec![], vec![])
    }

    #[test]
    fn field_offsets_pack_after_header() {
        let object = root();
        let point = ClassMetadata::build(
            "Point".into(),
            Some(&object),
            vec![("x".into(), Type::Int), ("y".into(), Type::Int)],
            vec![],
        );
        assert_eq!(point.field_offset("x"), Some(OBJECT_HEADER_SIZE));
        assert_eq!(point.field_offset("y"), Some(OBJECT_HEADER_SIZE + 4));
        assert_eq!(point.total_size, OBJECT_HEADER_SIZE + 8);
    }

    #[test]
    fn subclass_fields_follow_parent_fields() {
        let object = root();
        let point = ClassMetadata::build(
            "Point".into(),
            Some(&object),
            vec![("x".into(), Type::Int), ("y".into(), Type::Int)],
            vec![],
        );
        let point3 = ClassMetadata::build(
            "Point3".into(),
            Some(&point),
            vec![("z".into(), Type::Int)],
            vec![],
        );
        assert_eq!(point3.field_offset("x"), Some(OBJECT_HEADER_SIZE));
        assert_eq!(point3.field_offset("z"), Some(OBJECT_HEADER_SIZE + 8));
    }

    #[test]
    fn override_reuses_parent_vtable_slot() {
        let object = root();
        let shape = ClassMetadata::build(
            "Shape".into(),
            Some(&object),
            vec![],
            vec!["Shape::area()".into()],
        );
        let circle = ClassMetadata::build(
            "Circle".into(),
            Some(&shape),
            vec![],
            vec!["Circle::area()".into()],
        );
        assert_eq!(shape.vtable_slot("Shape::area()"), Some(0));
        assert_eq!(circle.vtable_slot("Circle::area()"), Some(0));
        assert_eq!(circle.vtable.len(), 1);
    }

    #[test]
    fn new_virtual_method_appends_slot() {
        let object = root();
        let shape = ClassMetadata::build(
            "Shape".into(),
            Some(&object),
            vec![],
            vec!["Shape::area()".into()],
        );
        let circle = ClassMetadata::build(
            "Circle".into(),
            Some(&shape),
            vec![],
            vec!["Circle::area()".into(), "Circle::radius()".into()],
        );
        assert_eq!(circle.vtable_slot("Circle::radius()"), Some(1));
    }
}
