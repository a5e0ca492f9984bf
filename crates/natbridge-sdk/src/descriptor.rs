//! Declared-type descriptors
//!
//! These are the immutable inputs produced by binding generators: field
//! order and element counts for aggregates, and call-target attributes for
//! methods and operators. The engine derives layouts and dispatch metadata
//! from them and never mutates them.

use serde::{Deserialize, Serialize};

use crate::error::LayoutError;
use crate::operator::{Arity, OperatorKind};
use crate::types::{ScalarKind, TypeKey, TypeTag};
use crate::uncertain::UncertainSpec;

fn default_count() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Fields
// ============================================================================

/// One field of a declared aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name (accessor name in the managed binding)
    pub name: String,
    /// Layout order, contiguous from 0 within a type
    pub order: u32,
    /// Element type
    pub ty: TypeTag,
    /// 1 for a scalar, N for an inline fixed-size array
    #[serde(default = "default_count")]
    pub count: u32,
    /// Whether a getter is bound
    #[serde(default = "default_true")]
    pub getter: bool,
    /// Whether a setter is bound
    #[serde(default = "default_true")]
    pub setter: bool,
    /// Declared representation ambiguity
    #[serde(default)]
    pub uncertain: Option<UncertainSpec>,
}

impl FieldDescriptor {
    /// Field of any element type with count 1
    pub fn new(name: impl Into<String>, order: u32, ty: TypeTag) -> Self {
        FieldDescriptor {
            name: name.into(),
            order,
            ty,
            count: 1,
            getter: true,
            setter: true,
            uncertain: None,
        }
    }

    /// Scalar field
    pub fn scalar(name: impl Into<String>, order: u32, kind: ScalarKind) -> Self {
        Self::new(name, order, TypeTag::Scalar(kind))
    }

    /// Nested aggregate field
    pub fn aggregate(name: impl Into<String>, order: u32, key: impl AsRef<str>) -> Self {
        Self::new(name, order, TypeTag::aggregate(key))
    }

    /// Set the inline element count
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }

    /// Attach an uncertainty annotation
    pub fn with_uncertain(mut self, spec: UncertainSpec) -> Self {
        self.uncertain = Some(spec);
        self
    }

    /// Drop the setter
    pub fn read_only(mut self) -> Self {
        self.setter = false;
        self
    }

    /// Whether the field is an inline array
    pub fn is_array(&self) -> bool {
        self.count > 1
    }
}

// ============================================================================
// Parameters and returns
// ============================================================================

/// Element count behind a pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointeeCount {
    /// Exactly one element
    Single,
    /// A known number of elements
    Fixed(u32),
    /// Not provable from the signature
    Unknown,
}

/// How a slot crosses the native boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Passing {
    /// The element itself
    ByValue,
    /// Address of one or more elements
    ByPointer {
        /// Elements behind the pointer
        count: PointeeCount,
    },
}

impl Default for Passing {
    fn default() -> Self {
        Passing::ByValue
    }
}

/// A native parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    /// Element type
    pub ty: TypeTag,
    /// Value or pointer passing
    #[serde(default)]
    pub passing: Passing,
    /// Pointee is `const`
    #[serde(default)]
    pub const_pointee: bool,
    /// Declared representation ambiguity
    #[serde(default)]
    pub uncertain: Option<UncertainSpec>,
}

impl ParamDescriptor {
    /// Scalar passed by value
    pub fn scalar(kind: ScalarKind) -> Self {
        ParamDescriptor {
            ty: TypeTag::Scalar(kind),
            passing: Passing::ByValue,
            const_pointee: false,
            uncertain: None,
        }
    }

    /// Aggregate passed by value
    pub fn by_value(key: impl AsRef<str>) -> Self {
        ParamDescriptor {
            ty: TypeTag::aggregate(key),
            passing: Passing::ByValue,
            const_pointee: false,
            uncertain: None,
        }
    }

    /// Pointer to one element
    pub fn reference(ty: TypeTag) -> Self {
        Self::pointer(ty, PointeeCount::Single)
    }

    /// Pointer to `count` elements
    pub fn array(ty: TypeTag, count: u32) -> Self {
        Self::pointer(ty, PointeeCount::Fixed(count))
    }

    /// Pointer with an explicit pointee count
    pub fn pointer(ty: TypeTag, count: PointeeCount) -> Self {
        ParamDescriptor {
            ty,
            passing: Passing::ByPointer { count },
            const_pointee: false,
            uncertain: None,
        }
    }

    /// Mark the pointee `const`
    pub fn constant(mut self) -> Self {
        self.const_pointee = true;
        self
    }

    /// Attach an uncertainty annotation
    pub fn with_uncertain(mut self, spec: UncertainSpec) -> Self {
        self.uncertain = Some(spec);
        self
    }
}

/// A native return slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDescriptor {
    /// Element type
    pub ty: TypeTag,
    /// Value or pointer passing
    #[serde(default)]
    pub passing: Passing,
    /// Pointee is `const`; returned peers are read-only
    #[serde(default)]
    pub const_pointee: bool,
    /// Returned memory is owned by the caller
    #[serde(default)]
    pub owned: bool,
    /// Declared representation ambiguity
    #[serde(default)]
    pub uncertain: Option<UncertainSpec>,
}

impl ReturnDescriptor {
    /// No return value
    pub fn void() -> Self {
        ReturnDescriptor {
            ty: TypeTag::Void,
            passing: Passing::ByValue,
            const_pointee: false,
            owned: false,
            uncertain: None,
        }
    }

    /// Scalar returned by value
    pub fn scalar(kind: ScalarKind) -> Self {
        ReturnDescriptor {
            ty: TypeTag::Scalar(kind),
            ..Self::void()
        }
    }

    /// Aggregate returned by value
    pub fn by_value(key: impl AsRef<str>) -> Self {
        ReturnDescriptor {
            ty: TypeTag::aggregate(key),
            ..Self::void()
        }
    }

    /// Pointer with an explicit pointee count
    pub fn pointer(ty: TypeTag, count: PointeeCount) -> Self {
        ReturnDescriptor {
            ty,
            passing: Passing::ByPointer { count },
            ..Self::void()
        }
    }

    /// Pointer to one element
    pub fn reference(ty: TypeTag) -> Self {
        Self::pointer(ty, PointeeCount::Single)
    }

    /// Caller takes ownership of the returned memory
    pub fn owned(mut self) -> Self {
        self.owned = true;
        self
    }

    /// Mark the pointee `const`
    pub fn constant(mut self) -> Self {
        self.const_pointee = true;
        self
    }

    /// Attach an uncertainty annotation
    pub fn with_uncertain(mut self, spec: UncertainSpec) -> Self {
        self.uncertain = Some(spec);
        self
    }
}

impl Default for ReturnDescriptor {
    fn default() -> Self {
        Self::void()
    }
}

// ============================================================================
// Call targets
// ============================================================================

/// C++ virtuality of a method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Virtuality {
    /// Fixed entry point
    #[default]
    NonVirtual,
    /// Dispatch-table slot with a default implementation
    Virtual,
    /// Dispatch-table slot that must be overridden
    PureVirtual,
}

impl Virtuality {
    /// Whether the target dispatches through a table
    pub fn is_dynamic(self) -> bool {
        !matches!(self, Virtuality::NonVirtual)
    }
}

/// Named method or operator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Plain method
    Method(String),
    /// Member operator
    Operator {
        /// Operator kind
        kind: OperatorKind,
        /// Receiver is the right-hand operand
        #[serde(default)]
        reflected: bool,
    },
}

impl TargetKind {
    /// Display name
    pub fn name(&self) -> String {
        match self {
            TargetKind::Method(name) => name.clone(),
            TargetKind::Operator { kind, reflected } => {
                if *reflected {
                    format!("{} (reflected)", kind.symbol())
                } else {
                    kind.symbol().to_string()
                }
            }
        }
    }
}

/// A native routine bound on a declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallTargetDescriptor {
    /// Method name or operator kind
    pub kind: TargetKind,
    /// Virtuality
    #[serde(default)]
    pub virtuality: Virtuality,
    /// `const` member function
    #[serde(default)]
    pub is_const: bool,
    /// Dispatch-table slot for virtual targets
    #[serde(default)]
    pub slot: Option<u32>,
    /// Native symbol of the fixed entry point
    #[serde(default)]
    pub symbol: Option<String>,
    /// Parameters, receiver excluded
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
    /// Return slot
    #[serde(default)]
    pub ret: ReturnDescriptor,
}

impl CallTargetDescriptor {
    /// Plain method
    pub fn method(name: impl Into<String>) -> Self {
        CallTargetDescriptor {
            kind: TargetKind::Method(name.into()),
            virtuality: Virtuality::NonVirtual,
            is_const: false,
            slot: None,
            symbol: None,
            params: Vec::new(),
            ret: ReturnDescriptor::void(),
        }
    }

    /// Member operator with the receiver on the left
    pub fn operator(kind: OperatorKind) -> Self {
        CallTargetDescriptor {
            kind: TargetKind::Operator {
                kind,
                reflected: false,
            },
            ..Self::method(String::new())
        }
    }

    /// Member operator with the receiver on the right
    pub fn reflected_operator(kind: OperatorKind) -> Self {
        CallTargetDescriptor {
            kind: TargetKind::Operator {
                kind,
                reflected: true,
            },
            ..Self::method(String::new())
        }
    }

    /// Mark `const`
    pub fn constant(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Virtual with a default implementation in `slot`
    pub fn virtual_slot(mut self, slot: u32) -> Self {
        self.virtuality = Virtuality::Virtual;
        self.slot = Some(slot);
        self
    }

    /// Pure virtual in `slot`
    pub fn pure_virtual(mut self, slot: u32) -> Self {
        self.virtuality = Virtuality::PureVirtual;
        self.slot = Some(slot);
        self
    }

    /// Native symbol of the fixed entry point
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Append a parameter
    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Set the return slot
    pub fn returns(mut self, ret: ReturnDescriptor) -> Self {
        self.ret = ret;
        self
    }

    /// Display name
    pub fn name(&self) -> String {
        self.kind.name()
    }

    /// Operator kind, if this is an operator
    pub fn operator_kind(&self) -> Option<OperatorKind> {
        match &self.kind {
            TargetKind::Operator { kind, .. } => Some(*kind),
            TargetKind::Method(_) => None,
        }
    }

    /// Structural well-formedness of the target
    pub fn validate(&self, owner: &TypeKey) -> Result<(), LayoutError> {
        let invalid = |reason: String| LayoutError::InvalidTarget {
            key: owner.clone(),
            target: self.name(),
            reason,
        };

        match &self.kind {
            TargetKind::Method(name) if name.is_empty() => {
                return Err(invalid("empty method name".to_string()));
            }
            TargetKind::Method(_) => {}
            TargetKind::Operator { kind, reflected } => {
                let expected = match kind.arity() {
                    Arity::Unary => Some(0),
                    Arity::Binary => Some(1),
                    Arity::Variadic => None,
                };
                if let Some(expected) = expected {
                    if self.params.len() != expected {
                        return Err(invalid(format!(
                            "operator takes {} parameter(s), {} declared",
                            expected,
                            self.params.len()
                        )));
                    }
                }
                if *reflected && !kind.is_reflectable() {
                    return Err(invalid("operator cannot be reflected".to_string()));
                }
                if self.is_const && kind.mutates_receiver() {
                    return Err(invalid("mutating operator declared const".to_string()));
                }
            }
        }

        if self.virtuality.is_dynamic() && self.slot.is_none() {
            return Err(invalid("virtual target without a slot".to_string()));
        }

        for (i, param) in self.params.iter().enumerate() {
            if param.ty.is_void() {
                return Err(invalid(format!("parameter {} has void type", i)));
            }
            if let Passing::ByPointer {
                count: PointeeCount::Fixed(0),
            } = param.passing
            {
                return Err(invalid(format!("parameter {} points to 0 elements", i)));
            }
            if let Some(spec) = &param.uncertain {
                spec.validate()?;
            }
        }
        if let Some(spec) = &self.ret.uncertain {
            spec.validate()?;
        }
        if self.ret.owned && !matches!(self.ret.passing, Passing::ByPointer { .. }) {
            return Err(invalid("owned return must be a pointer".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Declared types
// ============================================================================

/// Complete metadata of one declared native type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredType {
    /// Type identity
    pub key: TypeKey,
    /// Fields, any order; layout order comes from `FieldDescriptor::order`
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    /// Call targets
    #[serde(default)]
    pub methods: Vec<CallTargetDescriptor>,
    /// Base type for virtual dispatch
    #[serde(default)]
    pub parent: Option<TypeKey>,
    /// Minimum alignment of the aggregate
    #[serde(default)]
    pub align: Option<u32>,
}

impl DeclaredType {
    /// Empty declaration
    pub fn new(key: impl AsRef<str>) -> Self {
        DeclaredType {
            key: TypeKey::new(key),
            fields: Vec::new(),
            methods: Vec::new(),
            parent: None,
            align: None,
        }
    }

    /// Append a field
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Append a call target
    pub fn method(mut self, target: CallTargetDescriptor) -> Self {
        self.methods.push(target);
        self
    }

    /// Set the base type
    pub fn with_parent(mut self, parent: impl AsRef<str>) -> Self {
        self.parent = Some(TypeKey::new(parent));
        self
    }

    /// Set a minimum alignment
    pub fn with_align(mut self, align: u32) -> Self {
        self.align = Some(align);
        self
    }

    /// Aggregate types this type embeds by value
    pub fn embedded_types(&self) -> impl Iterator<Item = &TypeKey> {
        self.fields.iter().filter_map(|f| f.ty.aggregate_key())
    }

    /// Validate everything that does not require other declarations.
    ///
    /// Field order contiguity is checked by the layout engine.
    pub fn validate(&self) -> Result<(), LayoutError> {
        for field in &self.fields {
            if let Some(spec) = &field.uncertain {
                spec.validate()?;
            }
        }
        for target in &self.methods {
            target.validate(&self.key)?;
        }
        Ok(())
    }
}
