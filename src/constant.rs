use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

/// Reference to an entry in an external constant pool.
///
/// The pool provider hands these out before indices are known and fills the
/// index in later with [`ConstantRef::assign`]. Clones share the underlying
/// cell, so an assignment is visible through every clone - this is what lets
/// one pool entry back several instructions. Encoding an instruction whose
/// reference is still unassigned is a fatal [`crate::Error::UnresolvedConstant`].
#[derive(Clone)]
pub struct ConstantRef {
    index: Rc<Cell<Option<u16>>>,
}

impl ConstantRef {
    /// A reference whose index has not been assigned yet.
    pub fn unresolved() -> ConstantRef {
        ConstantRef {
            index: Rc::new(Cell::new(None)),
        }
    }

    /// A reference with a known index.
    pub fn resolved(index: u16) -> ConstantRef {
        ConstantRef {
            index: Rc::new(Cell::new(Some(index))),
        }
    }

    /// Assign the pool index. Visible through all clones of this reference.
    pub fn assign(&self, index: u16) {
        self.index.set(Some(index));
    }

    /// The assigned pool index, or `None` if the provider has not assigned
    /// one yet.
    pub fn index(&self) -> Option<u16> {
        self.index.get()
    }
}

impl fmt::Debug for ConstantRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(index) => formatter.write_fmt(format_args!("#{}", index)),
            None => formatter.write_str("#?"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn assignment_is_shared_between_clones() {
        let original = ConstantRef::unresolved();
        let clone = original.clone();
        assert_eq!(clone.index(), None);

        original.assign(42);
        assert_eq!(clone.index(), Some(42));
    }

    #[test]
    fn debug_rendering() {
        assert_eq!(format!("{:?}", ConstantRef::unresolved()), "#?");
        assert_eq!(format!("{:?}", ConstantRef::resolved(7)), "#7");
    }
}
