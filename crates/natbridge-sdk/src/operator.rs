//! C++ operator kinds bound as member operators

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operand count of an operator, not counting the receiver's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arity {
    /// Receiver is the only operand
    Unary,
    /// Receiver and one other operand
    Binary,
    /// Any number of arguments (`operator()`)
    Variadic,
}

/// Operator kinds a member method can be declared as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    // Unary
    /// `+a`
    UnaryPlus,
    /// `-a`
    Negate,
    /// `!a`
    Not,
    /// `~a`
    Complement,
    /// `*a`
    Deref,
    /// `a->`
    Arrow,
    /// `++a`
    PreIncrement,
    /// `--a`
    PreDecrement,
    /// `a++`; called with an implicit `int` 0
    PostIncrement,
    /// `a--`; called with an implicit `int` 0
    PostDecrement,

    // Arithmetic and bitwise
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Rem,
    /// `a & b`
    BitAnd,
    /// `a | b`
    BitOr,
    /// `a ^ b`
    BitXor,
    /// `a << b`
    Shl,
    /// `a >> b`
    Shr,

    // Logical and comparison
    /// `a && b`
    LogicalAnd,
    /// `a || b`
    LogicalOr,
    /// `a == b`
    Eq,
    /// `a != b`
    Ne,
    /// `a < b`
    Lt,
    /// `a > b`
    Gt,
    /// `a <= b`
    Le,
    /// `a >= b`
    Ge,

    // Assignment
    /// `a = b`
    Assign,
    /// `a += b`
    AddAssign,
    /// `a -= b`
    SubAssign,
    /// `a *= b`
    MulAssign,
    /// `a /= b`
    DivAssign,
    /// `a %= b`
    RemAssign,
    /// `a &= b`
    AndAssign,
    /// `a |= b`
    OrAssign,
    /// `a ^= b`
    XorAssign,
    /// `a <<= b`
    ShlAssign,
    /// `a >>= b`
    ShrAssign,

    // Other
    /// `a[i]`
    Subscript,
    /// `a, b`
    Comma,
    /// `a->*b`
    ArrowStar,
    /// `a(args...)`
    Call,
}

impl OperatorKind {
    /// Operand count of the native operator
    pub const fn arity(self) -> Arity {
        use OperatorKind::*;
        match self {
            UnaryPlus | Negate | Not | Complement | Deref | Arrow | PreIncrement
            | PreDecrement | PostIncrement | PostDecrement => Arity::Unary,
            Call => Arity::Variadic,
            _ => Arity::Binary,
        }
    }

    /// Whether the operator mutates its left-hand operand
    pub const fn mutates_receiver(self) -> bool {
        use OperatorKind::*;
        matches!(
            self,
            Assign
                | AddAssign
                | SubAssign
                | MulAssign
                | DivAssign
                | RemAssign
                | AndAssign
                | OrAssign
                | XorAssign
                | ShlAssign
                | ShrAssign
                | PreIncrement
                | PreDecrement
                | PostIncrement
                | PostDecrement
        )
    }

    /// Postfix `++`/`--` take a dummy `int` operand in the native convention
    pub const fn is_postfix(self) -> bool {
        matches!(self, OperatorKind::PostIncrement | OperatorKind::PostDecrement)
    }

    /// Whether the operator may be declared reflected (receiver on the right)
    pub const fn is_reflectable(self) -> bool {
        matches!(self.arity(), Arity::Binary) && !self.mutates_receiver()
    }

    /// C++ spelling
    pub const fn symbol(self) -> &'static str {
        use OperatorKind::*;
        match self {
            UnaryPlus | Add => "operator+",
            Negate | Sub => "operator-",
            Not => "operator!",
            Complement => "operator~",
            Deref | Mul => "operator*",
            Arrow => "operator->",
            PreIncrement | PostIncrement => "operator++",
            PreDecrement | PostDecrement => "operator--",
            Div => "operator/",
            Rem => "operator%",
            BitAnd => "operator&",
            BitOr => "operator|",
            BitXor => "operator^",
            Shl => "operator<<",
            Shr => "operator>>",
            LogicalAnd => "operator&&",
            LogicalOr => "operator||",
            Eq => "operator==",
            Ne => "operator!=",
            Lt => "operator<",
            Gt => "operator>",
            Le => "operator<=",
            Ge => "operator>=",
            Assign => "operator=",
            AddAssign => "operator+=",
            SubAssign => "operator-=",
            MulAssign => "operator*=",
            DivAssign => "operator/=",
            RemAssign => "operator%=",
            AndAssign => "operator&=",
            OrAssign => "operator|=",
            XorAssign => "operator^=",
            ShlAssign => "operator<<=",
            ShrAssign => "operator>>=",
            Subscript => "operator[]",
            Comma => "operator,",
            ArrowStar => "operator->*",
            Call => "operator()",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}
