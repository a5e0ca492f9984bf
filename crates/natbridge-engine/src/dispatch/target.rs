//! Validated call targets and their calling conventions

use natbridge_sdk::{
    Arity, CallTargetDescriptor, LayoutError, OperatorKind, ParamDescriptor, ReturnDescriptor,
    TargetKind, TypeKey, Virtuality,
};

/// How arguments are laid out for the native entry point.
///
/// This is the finite decision table virtuality × constness × operator arity
/// reduced to what marshaling needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallConvention {
    /// Managed arguments expected (receiver excluded); `None` for variadic
    pub managed_args: Option<usize>,
    /// Receiver is passed as the left-hand (first) operand
    pub receiver_is_lhs: bool,
    /// Postfix operator: an implicit `int 0` is appended
    pub implicit_int: bool,
    /// Receiver must be writable
    pub requires_writable: bool,
}

impl CallConvention {
    fn for_target(desc: &CallTargetDescriptor) -> Self {
        match &desc.kind {
            TargetKind::Method(_) => CallConvention {
                managed_args: Some(desc.params.len()),
                receiver_is_lhs: true,
                implicit_int: false,
                requires_writable: !desc.is_const,
            },
            TargetKind::Operator { kind, reflected } => CallConvention {
                managed_args: match kind.arity() {
                    Arity::Unary => Some(0),
                    Arity::Binary => Some(1),
                    Arity::Variadic => None,
                },
                receiver_is_lhs: !reflected,
                implicit_int: kind.is_postfix(),
                requires_writable: !desc.is_const,
            },
        }
    }
}

/// A call target bound on a declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    owner: TypeKey,
    index: usize,
    descriptor: CallTargetDescriptor,
    convention: CallConvention,
}

impl CallTarget {
    /// Validate a descriptor and compute its convention
    pub fn new(
        owner: &TypeKey,
        index: usize,
        descriptor: &CallTargetDescriptor,
    ) -> Result<Self, LayoutError> {
        descriptor.validate(owner)?;
        Ok(CallTarget {
            owner: owner.clone(),
            index,
            convention: CallConvention::for_target(descriptor),
            descriptor: descriptor.clone(),
        })
    }

    /// Declaring type
    pub fn owner(&self) -> &TypeKey {
        &self.owner
    }

    /// Position within the declaring type's methods
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn descriptor(&self) -> &CallTargetDescriptor {
        &self.descriptor
    }

    pub fn convention(&self) -> CallConvention {
        self.convention
    }

    pub fn virtuality(&self) -> Virtuality {
        self.descriptor.virtuality
    }

    pub fn is_const(&self) -> bool {
        self.descriptor.is_const
    }

    pub fn params(&self) -> &[ParamDescriptor] {
        &self.descriptor.params
    }

    pub fn ret(&self) -> &ReturnDescriptor {
        &self.descriptor.ret
    }

    /// Method name, if this is a plain method
    pub fn method_name(&self) -> Option<&str> {
        match &self.descriptor.kind {
            TargetKind::Method(name) => Some(name),
            TargetKind::Operator { .. } => None,
        }
    }

    /// Operator kind and reflection, if this is an operator
    pub fn operator(&self) -> Option<(OperatorKind, bool)> {
        match &self.descriptor.kind {
            TargetKind::Operator { kind, reflected } => Some((*kind, *reflected)),
            TargetKind::Method(_) => None,
        }
    }

    /// `Owner::name` for diagnostics
    pub fn display_name(&self) -> String {
        format!("{}::{}", self.owner, self.descriptor.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natbridge_sdk::{ScalarKind, TypeTag};

    #[test]
    fn test_method_convention() {
        let owner = TypeKey::new("Counter");
        let desc = CallTargetDescriptor::method("get")
            .constant()
            .returns(ReturnDescriptor::scalar(ScalarKind::I32));
        let target = CallTarget::new(&owner, 0, &desc).unwrap();
        let conv = target.convention();
        assert_eq!(conv.managed_args, Some(0));
        assert!(!conv.requires_writable);
        assert_eq!(target.display_name(), "Counter::get");
    }

    #[test]
    fn test_operator_conventions() {
        let owner = TypeKey::new("Vec2");

        let post = CallTargetDescriptor::operator(OperatorKind::PostIncrement)
            .returns(ReturnDescriptor::by_value("Vec2"));
        let conv = CallTarget::new(&owner, 0, &post).unwrap().convention();
        assert_eq!(conv.managed_args, Some(0));
        assert!(conv.implicit_int);
        assert!(conv.requires_writable);

        let reflected = CallTargetDescriptor::reflected_operator(OperatorKind::Mul)
            .constant()
            .param(ParamDescriptor::scalar(ScalarKind::F64));
        let conv = CallTarget::new(&owner, 1, &reflected).unwrap().convention();
        assert!(!conv.receiver_is_lhs);
        assert_eq!(conv.managed_args, Some(1));

        let call = CallTargetDescriptor::operator(OperatorKind::Call)
            .param(ParamDescriptor::reference(TypeTag::aggregate("Vec2")));
        let conv = CallTarget::new(&owner, 2, &call).unwrap().convention();
        assert_eq!(conv.managed_args, None);
    }
}
