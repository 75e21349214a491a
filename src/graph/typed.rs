use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use super::{InstId, ObjectGraph};
use crate::schema::{ModelClass, SchemaRegistry};

/// Typed handle to an instance of model class `T` inside an [`ObjectGraph`].
///
/// In class declarations `Ref<T>` marks a reference field; at run time it is
/// an [`InstId`] whose class has been checked against `T`.
pub struct Ref<T> {
    id: InstId,
    _class: PhantomData<fn() -> T>,
}

impl<T> Ref<T> {
    pub(crate) fn new_unchecked(id: InstId) -> Self {
        Self {
            id,
            _class: PhantomData,
        }
    }

    pub fn id(&self) -> InstId {
        self.id
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Ref<T> {}

impl<T> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Ref<T> {}

impl<T> Hash for Ref<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ModelClass> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref<{}>({})", T::CLASS_NAME, self.id)
    }
}

impl<T> From<Ref<T>> for InstId {
    fn from(r: Ref<T>) -> Self {
        r.id
    }
}

impl ObjectGraph {
    /// Allocates an uninitialized instance of `T`.
    pub fn create_typed<T: ModelClass>(&mut self) -> Ref<T> {
        Ref::new_unchecked(self.create(T::CLASS_NAME))
    }

    /// Views `id` as a `T` when its class is `T` or a subclass of it.
    pub fn cast<T: ModelClass>(&self, schema: &SchemaRegistry, id: InstId) -> Option<Ref<T>> {
        let class = self.class_of(id)?;
        schema
            .is_subclass(class, T::CLASS_NAME)
            .then(|| Ref::new_unchecked(id))
    }
}
