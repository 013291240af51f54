/// Binary operator of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryVerb {
    Plus,
    Minus,
    Times,
    Divide,
    Same,
    Different,
    GreaterThan,
    LessThan,
}

/// Unary operator of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryVerb {
    Negate,
    Not,
}

/// A parse-tree node. `Variable` and `Member` carry `is_lhs`, set by the
/// assignment production on the outermost node of its target, which is what
/// turns the node's emission from a read (`VAR`/`GET`) into a write
/// (`SET`/`PUT`).
#[derive(Debug, Clone, PartialEq)]
pub enum Ast {
    Statements(Vec<Ast>),
    Assignment {
        target: Box<Ast>,
        value: Box<Ast>,
    },
    IfThenElse {
        /// `(condition, then-block)` per `if`/`else if` arm, in order.
        arms: Vec<(Ast, Ast)>,
        otherwise: Option<Box<Ast>>,
    },
    Loop {
        condition: Box<Ast>,
        body: Box<Ast>,
    },
    Binary {
        verb: BinaryVerb,
        lhs: Box<Ast>,
        rhs: Box<Ast>,
    },
    Unary {
        verb: UnaryVerb,
        operand: Box<Ast>,
    },
    Integer(i32),
    Boolean(bool),
    Float(f32),
    Str(Vec<u8>),
    Variable {
        name: Vec<u8>,
        is_lhs: bool,
    },
    /// A table literal; pair elements contribute to the map side-table.
    Table(Vec<Ast>),
    Pair {
        key: Box<Ast>,
        value: Box<Ast>,
    },
    Fdecl {
        params: Vec<Vec<u8>>,
        body: Box<Ast>,
    },
    Fcall {
        callee: Box<Ast>,
        args: Vec<Ast>,
    },
    Member {
        object: Box<Ast>,
        index: Box<Ast>,
        is_lhs: bool,
    },
    Return(Box<Ast>),
}

impl Ast {
    /// Mark this node as an assignment target. Only the outermost node of
    /// the target chain is marked; inner member accesses stay reads.
    pub fn mark_lhs(&mut self) {
        match self {
            Ast::Variable { is_lhs, .. } => *is_lhs = true,
            Ast::Member { is_lhs, .. } => *is_lhs = true,
            _ => {}
        }
    }

    pub fn is_lhs(&self) -> bool {
        matches!(
            self,
            Ast::Variable { is_lhs: true, .. } | Ast::Member { is_lhs: true, .. }
        )
    }
}
