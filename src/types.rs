//! Resolved type descriptors, stored in an arena and addressed by [`TypeId`] handles.
//!
//! Every non-struct shape is interned, so `list<i32>` always resolves to the same handle
//! no matter how many times it is spelled. Structs are nominal: the name is the identity,
//! and the field list may be supplied after the struct has already been referenced
//! (which is how self-referential types get built).

use core::fmt;
use std::collections::{HashMap, HashSet};

use lasso::{Rodeo, Spur};

/// Stable handle of a type descriptor inside a [`TypeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u64);

impl TypeId {
    /// Wraps a raw handle. Nothing is checked here: handles that do not fit an
    /// instruction operand are rejected when an instruction is built from them.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    fn index(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Wire-level type tags of the Thrift binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TypeKind {
    Void = 1,
    Bool = 2,
    I8 = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl TypeKind {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Shape of a single resolved type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    Double,
    String,
    Binary,
    /// Optional value, absent when null
    Pointer(TypeId),
    List(TypeId),
    Set(TypeId),
    Map(TypeId, TypeId),
    /// Named struct, fields are looked up through [`TypeArena::resolve_fields`]
    Struct(Spur),
}

/// Host memory layout of a type, used to derive field offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: usize,
    pub align: usize,
}

impl Layout {
    const fn new(size: usize, align: usize) -> Self {
        Self { size, align }
    }
}

/// A struct field as declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub id: i16,
    pub name: Spur,
    pub ty: TypeId,
}

/// A struct field after resolution: identifier, type and byte offset in the host struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub id: i16,
    pub ty: TypeId,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("{0} does not belong to this type arena")]
    UnknownHandle(TypeId),
    #[error("struct {0} is declared but never defined")]
    Undefined(Box<str>),
    #[error("struct {0} is defined more than once")]
    Redefined(Box<str>),
    #[error("{0} is not a struct type")]
    NotAStruct(Box<str>),
    #[error("struct {0} contains itself by value and has no finite layout")]
    InfiniteSize(Box<str>),
    #[error("field id {id} of struct {name} is not a positive integer")]
    InvalidFieldId { name: Box<str>, id: i16 },
    #[error("field id {id} is used twice in struct {name}")]
    DuplicateFieldId { name: Box<str>, id: i16 },
}

#[derive(Default)]
pub struct TypeArena {
    /// interner for struct and field names
    rodeo: Rodeo,
    types: Vec<TypeDesc>,
    interned: HashMap<TypeDesc, TypeId>,
    fields: HashMap<TypeId, Box<[FieldDef]>>,
}

impl fmt::Debug for TypeArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeArena")
            .field("types", &self.types.len())
            .field("structs", &self.fields.len())
            .finish()
    }
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Returns the handle for `desc`, allocating one the first time the shape is seen.
    pub fn intern(&mut self, desc: TypeDesc) -> TypeId {
        if let Some(id) = self.interned.get(&desc) {
            return *id;
        }
        let id = TypeId(self.types.len() as u64);
        self.types.push(desc);
        self.interned.insert(desc, id);
        id
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(TypeDesc::Void)
    }

    pub fn bool(&mut self) -> TypeId {
        self.intern(TypeDesc::Bool)
    }

    pub fn i8(&mut self) -> TypeId {
        self.intern(TypeDesc::I8)
    }

    pub fn i16(&mut self) -> TypeId {
        self.intern(TypeDesc::I16)
    }

    pub fn i32(&mut self) -> TypeId {
        self.intern(TypeDesc::I32)
    }

    pub fn i64(&mut self) -> TypeId {
        self.intern(TypeDesc::I64)
    }

    pub fn double(&mut self) -> TypeId {
        self.intern(TypeDesc::Double)
    }

    pub fn string(&mut self) -> TypeId {
        self.intern(TypeDesc::String)
    }

    pub fn binary(&mut self) -> TypeId {
        self.intern(TypeDesc::Binary)
    }

    pub fn pointer(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeDesc::Pointer(elem))
    }

    pub fn list(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeDesc::List(elem))
    }

    pub fn set(&mut self, elem: TypeId) -> TypeId {
        self.intern(TypeDesc::Set(elem))
    }

    pub fn map(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.intern(TypeDesc::Map(key, value))
    }

    /// Declares a struct by name. Declaring the same name again returns the same handle.
    pub fn declare_struct(&mut self, name: impl AsRef<str>) -> TypeId {
        let name = self.rodeo.get_or_intern(name.as_ref());
        self.intern(TypeDesc::Struct(name))
    }

    /// Supplies the ordered field list of a declared struct.
    pub fn define_struct<S: AsRef<str>>(
        &mut self,
        id: TypeId,
        fields: impl IntoIterator<Item = (i16, S, TypeId)>,
    ) -> Result<(), ResolveError> {
        let TypeDesc::Struct(name) = self.desc(id)? else {
            return Err(ResolveError::NotAStruct(self.display(id).to_string().into()));
        };
        if self.fields.contains_key(&id) {
            return Err(ResolveError::Redefined(self.rodeo.resolve(&name).into()));
        }
        let fields = fields
            .into_iter()
            .map(|(fid, fname, ty)| FieldDef {
                id: fid,
                name: self.rodeo.get_or_intern(fname.as_ref()),
                ty,
            })
            .collect();
        self.fields.insert(id, fields);
        Ok(())
    }

    pub fn desc(&self, id: TypeId) -> Result<TypeDesc, ResolveError> {
        id.index()
            .and_then(|idx| self.types.get(idx))
            .copied()
            .ok_or(ResolveError::UnknownHandle(id))
    }

    /// Looks up a struct handle by name.
    pub fn find_struct(&self, name: impl AsRef<str>) -> Option<TypeId> {
        let name = self.rodeo.get(name.as_ref())?;
        self.interned.get(&TypeDesc::Struct(name)).copied()
    }

    pub fn is_defined(&self, id: TypeId) -> bool {
        self.fields.contains_key(&id)
    }

    /// Declared fields of a struct, in declaration order.
    pub fn field_defs(&self, id: TypeId) -> Option<&[FieldDef]> {
        self.fields.get(&id).map(|f| &f[..])
    }

    pub fn resolve_name(&self, name: Spur) -> &str {
        self.rodeo.resolve(&name)
    }

    /// Tag written on the wire for a value of this type. Pointers are transparent.
    pub fn wire_kind(&self, id: TypeId) -> Result<TypeKind, ResolveError> {
        Ok(match self.desc(id)? {
            TypeDesc::Void => TypeKind::Void,
            TypeDesc::Bool => TypeKind::Bool,
            TypeDesc::I8 => TypeKind::I8,
            TypeDesc::I16 => TypeKind::I16,
            TypeDesc::I32 => TypeKind::I32,
            TypeDesc::I64 => TypeKind::I64,
            TypeDesc::Double => TypeKind::Double,
            TypeDesc::String | TypeDesc::Binary => TypeKind::String,
            TypeDesc::Pointer(elem) => self.wire_kind(elem)?,
            TypeDesc::List(_) => TypeKind::List,
            TypeDesc::Set(_) => TypeKind::Set,
            TypeDesc::Map(..) => TypeKind::Map,
            TypeDesc::Struct(_) => TypeKind::Struct,
        })
    }

    pub fn layout(&self, id: TypeId) -> Result<Layout, ResolveError> {
        self.layout_in(id, &mut HashSet::new())
    }

    fn layout_in(&self, id: TypeId, visiting: &mut HashSet<TypeId>) -> Result<Layout, ResolveError> {
        Ok(match self.desc(id)? {
            TypeDesc::Void => Layout::new(0, 1),
            TypeDesc::Bool | TypeDesc::I8 => Layout::new(1, 1),
            TypeDesc::I16 => Layout::new(2, 2),
            TypeDesc::I32 => Layout::new(4, 4),
            TypeDesc::I64 | TypeDesc::Double => Layout::new(8, 8),
            // pointer and length
            TypeDesc::String | TypeDesc::Binary => Layout::new(16, 8),
            TypeDesc::Pointer(_) | TypeDesc::Map(..) => Layout::new(8, 8),
            // pointer, length and capacity
            TypeDesc::List(_) | TypeDesc::Set(_) => Layout::new(24, 8),
            TypeDesc::Struct(name) => {
                if !visiting.insert(id) {
                    return Err(ResolveError::InfiniteSize(self.rodeo.resolve(&name).into()));
                }
                let (_, layout) = self.place_fields(id, visiting)?;
                visiting.remove(&id);
                layout
            }
        })
    }

    /// Lays out the fields of a struct, returning their offsets and the struct layout.
    fn place_fields(
        &self,
        id: TypeId,
        visiting: &mut HashSet<TypeId>,
    ) -> Result<(Vec<Field>, Layout), ResolveError> {
        let defs = self.fields.get(&id).ok_or_else(|| {
            ResolveError::Undefined(self.display(id).to_string().into())
        })?;

        let mut placed = Vec::with_capacity(defs.len());
        let mut offset = 0usize;
        let mut align = 1usize;
        for def in defs.iter() {
            let field = self.layout_in(def.ty, visiting)?;
            offset = offset.next_multiple_of(field.align);
            placed.push(Field {
                id: def.id,
                ty: def.ty,
                offset,
            });
            offset += field.size;
            align = align.max(field.align);
        }
        Ok((placed, Layout::new(offset.next_multiple_of(align), align)))
    }

    /// Resolves the ordered field list of a struct, with host offsets.
    pub fn resolve_fields(&self, id: TypeId) -> Result<Vec<Field>, ResolveError> {
        let TypeDesc::Struct(name) = self.desc(id)? else {
            return Err(ResolveError::NotAStruct(self.display(id).to_string().into()));
        };
        let struct_name = || Box::<str>::from(self.rodeo.resolve(&name));

        let defs = self
            .fields
            .get(&id)
            .ok_or_else(|| ResolveError::Undefined(struct_name()))?;
        let mut seen = HashSet::with_capacity(defs.len());
        for def in defs.iter() {
            if def.id <= 0 {
                return Err(ResolveError::InvalidFieldId {
                    name: struct_name(),
                    id: def.id,
                });
            }
            if !seen.insert(def.id) {
                return Err(ResolveError::DuplicateFieldId {
                    name: struct_name(),
                    id: def.id,
                });
            }
        }

        let mut visiting = HashSet::from([id]);
        let (fields, _) = self.place_fields(id, &mut visiting)?;
        Ok(fields)
    }

    /// Renders a type the way it would be written in a schema.
    pub fn display(&self, id: TypeId) -> TypeDisplay<'_> {
        TypeDisplay { arena: self, id }
    }
}

pub struct TypeDisplay<'a> {
    arena: &'a TypeArena,
    id: TypeId,
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Ok(desc) = self.arena.desc(self.id) else {
            return write!(f, "{}", self.id);
        };
        let show = |id| self.arena.display(id);
        match desc {
            TypeDesc::Void => write!(f, "void"),
            TypeDesc::Bool => write!(f, "bool"),
            TypeDesc::I8 => write!(f, "i8"),
            TypeDesc::I16 => write!(f, "i16"),
            TypeDesc::I32 => write!(f, "i32"),
            TypeDesc::I64 => write!(f, "i64"),
            TypeDesc::Double => write!(f, "double"),
            TypeDesc::String => write!(f, "string"),
            TypeDesc::Binary => write!(f, "binary"),
            TypeDesc::Pointer(elem) => write!(f, "*{}", show(elem)),
            TypeDesc::List(elem) => write!(f, "list<{}>", show(elem)),
            TypeDesc::Set(elem) => write!(f, "set<{}>", show(elem)),
            TypeDesc::Map(key, value) => write!(f, "map<{},{}>", show(key), show(value)),
            TypeDesc::Struct(name) => write!(f, "{}", self.arena.rodeo.resolve(&name)),
        }
    }
}
