use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
};

/// Per-task storage, the cooperative analogue of thread-locals.
///
/// Values are keyed by type, so each task holds at most one value of any
/// given type.
#[derive(Default)]
pub struct TaskLocals {
    values: HashMap<TypeId, Box<dyn Any>>,
}

impl TaskLocals {
    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok().map(|old| *old))
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .and_then(|old| old.downcast::<T>().ok().map(|old| *old))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for TaskLocals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLocals")
            .field("values", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Session(&'static str);

    #[test]
    fn values_are_keyed_by_type() {
        let mut locals = TaskLocals::default();
        assert!(locals.insert(Session("alice")).is_none());
        assert!(locals.insert(7_u32).is_none());

        assert_eq!(locals.get::<Session>(), Some(&Session("alice")));
        assert_eq!(locals.insert(Session("bob")), Some(Session("alice")));
        assert_eq!(locals.len(), 2);
    }

    #[test]
    fn get_mut_and_remove() {
        let mut locals = TaskLocals::default();
        locals.insert(1_u64);
        *locals.get_mut::<u64>().unwrap() += 1;

        assert_eq!(locals.remove::<u64>(), Some(2));
        assert!(locals.is_empty());
        assert!(locals.get::<u64>().is_none());
    }
}
