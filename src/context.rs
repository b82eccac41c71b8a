//! Deduplicated storage for the module's types, constants and strings.
//!
//! None of these have an identity of their own (two identical `OpTypeInt 32 0`
//! instructions describe the same type), so they're kept once each, in
//! append-only sets, and referred to by small copyable [`Handle`]s.

use crate::{ConstDef, TypeDef};
use elsa::FrozenIndexSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Index of a `T` interned in a [`Context`], which can be looked up with
/// `cx[handle]`.
pub struct Handle<T: ?Sized> {
    index: u32,
    _marker: PhantomData<fn() -> Box<T>>,
}

pub type Type = Handle<TypeDef>;
pub type Const = Handle<ConstDef>;
pub type InternedStr = Handle<str>;

// Implemented by hand, as deriving them would require `T: Copy` etc.
impl<T: ?Sized> Copy for Handle<T> {}
impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: ?Sized> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}
impl<T: ?Sized> Eq for Handle<T> {}
impl<T: ?Sized> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}
impl<T: ?Sized + Internable> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", T::KIND, self.index)
    }
}

/// Append-only set of `T`s, indexed by insertion order.
pub struct Interner<T: ?Sized> {
    set: FrozenIndexSet<Box<T>>,
}

impl<T: ?Sized + Eq + Hash> Interner<T> {
    fn new() -> Self {
        Interner { set: FrozenIndexSet::new() }
    }

    fn index_of(&self, value: impl Intern<Def = T>) -> u32 {
        let index = match self.set.get_full(value.as_def()) {
            Some((index, _)) => index,
            None => self.set.insert_full(value.into_boxed()).0,
        };
        // Handles are 32-bit, like SPIR-V ids, so no valid module can run out.
        u32::try_from(index).unwrap_or(u32::MAX)
    }
}

/// Types with a dedicated [`Interner`] in [`Context`].
pub trait Internable: Eq + Hash {
    /// Short name used when printing handles (e.g. `type#3`).
    const KIND: &'static str;

    fn interner(cx: &Context) -> &Interner<Self>;
}

impl Internable for TypeDef {
    const KIND: &'static str = "type";
    fn interner(cx: &Context) -> &Interner<Self> {
        &cx.types
    }
}

impl Internable for ConstDef {
    const KIND: &'static str = "const";
    fn interner(cx: &Context) -> &Interner<Self> {
        &cx.consts
    }
}

impl Internable for str {
    const KIND: &'static str = "str";
    fn interner(cx: &Context) -> &Interner<Self> {
        &cx.strs
    }
}

/// Values accepted by [`Context::intern`], either owning or borrowing
/// their [`Internable`] definition.
pub trait Intern {
    type Def: ?Sized + Internable;

    fn as_def(&self) -> &Self::Def;
    fn into_boxed(self) -> Box<Self::Def>;
}

impl Intern for TypeDef {
    type Def = TypeDef;
    fn as_def(&self) -> &TypeDef {
        self
    }
    fn into_boxed(self) -> Box<TypeDef> {
        Box::new(self)
    }
}

impl Intern for ConstDef {
    type Def = ConstDef;
    fn as_def(&self) -> &ConstDef {
        self
    }
    fn into_boxed(self) -> Box<ConstDef> {
        Box::new(self)
    }
}

impl Intern for &str {
    type Def = str;
    fn as_def(&self) -> &str {
        self
    }
    fn into_boxed(self) -> Box<str> {
        self.into()
    }
}

impl Intern for String {
    type Def = str;
    fn as_def(&self) -> &str {
        self
    }
    fn into_boxed(self) -> Box<str> {
        self.into_boxed_str()
    }
}

/// Shared by all the [`Module`](crate::Module)s lowered with it (and by the
/// analyses of their functions), which can then compare handles directly.
pub struct Context {
    types: Interner<TypeDef>,
    consts: Interner<ConstDef>,
    strs: Interner<str>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Context { types: Interner::new(), consts: Interner::new(), strs: Interner::new() }
    }

    pub fn intern<V: Intern>(&self, value: V) -> Handle<V::Def> {
        let index = V::Def::interner(self).index_of(value);
        Handle { index, _marker: PhantomData }
    }
}

impl<T: ?Sized + Internable> std::ops::Index<Handle<T>> for Context {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        &T::interner(self).set[handle.index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_deduplicates() {
        let cx = Context::new();
        let a = cx.intern(TypeDef::Int { width: 32, signed: false });
        let b = cx.intern(TypeDef::Int { width: 32, signed: false });
        let c = cx.intern(TypeDef::Int { width: 32, signed: true });
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cx[c], TypeDef::Int { width: 32, signed: true });

        let s = cx.intern("main");
        assert_eq!(&cx[s], "main");
        assert_eq!(s, cx.intern(String::from("main")));
    }

    #[test]
    fn handles_are_per_kind() {
        let cx = Context::new();
        let ty = cx.intern(TypeDef::Bool);
        let s = cx.intern("bool");
        assert_eq!(format!("{ty:?}"), "type#0");
        assert_eq!(format!("{s:?}"), "str#0");
    }
}
