//! Host-defined value types.
//!
//! A host exposes its own concepts to scripts by wrapping data in a
//! [`CustomVar`] together with a [`CustomHandler`].  Every handler operation
//! has a soft-failing default, so a handler implements only what its type
//! supports.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use super::error::RuntimeError;
use super::value::{Arg, ArgKind};

/// Operations the evaluator forwards to a custom value.
pub trait CustomHandler {
    fn type_name(&self) -> &str {
        "custom"
    }

    /// `var[index]`
    fn indexer_getter(&self, _var: &CustomVar, _index: &Arg) -> Result<Option<Arg>, RuntimeError> {
        Ok(None)
    }

    /// `var.field`
    fn subfield_getter(&self, _var: &CustomVar, _field: &str) -> Result<Option<Arg>, RuntimeError> {
        Ok(None)
    }

    /// `var[index] = value`; `false` when unsupported.
    fn indexer_setter(&self, _var: &CustomVar, _index: &Arg, _value: Arg) -> Result<bool, RuntimeError> {
        Ok(false)
    }

    /// `var.field = value`; `false` when unsupported.
    fn subfield_setter(&self, _var: &CustomVar, _field: &str, _value: Arg) -> Result<bool, RuntimeError> {
        Ok(false)
    }

    fn to_string(&self, _var: &CustomVar) -> String {
        "{CustomVar}".to_owned()
    }

    /// Convert into a built-in kind; the result must not be custom itself.
    fn convert_to_common(&self, _var: &CustomVar, _kind: ArgKind) -> Option<Arg> {
        None
    }
}

/// A shared host value.  Clones share `data`; the last drop frees it.
#[derive(Clone)]
pub struct CustomVar {
    pub handler: Rc<dyn CustomHandler>,
    pub data: Rc<dyn Any>,
}

impl CustomVar {
    pub fn new<T: Any>(handler: Rc<dyn CustomHandler>, data: T) -> Self {
        CustomVar { handler, data: Rc::new(data) }
    }

    pub fn data_as<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Number of live references to the shared data.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.data)
    }

    pub fn ptr_eq(&self, other: &CustomVar) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for CustomVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomVar")
            .field("type", &self.handler.type_name())
            .field("refs", &self.ref_count())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
