//! The instruction set. Opcode byte values are stable: they are part of the
//! compiled-program (`.lic`) format.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Push nil.
    Nil = 0,
    /// Varint operand; push an integer.
    Int,
    /// Varint operand; push a boolean.
    Bool,
    /// Four little-endian bytes; push a float.
    Flt,
    /// String operand; push a string.
    Str,
    /// String operand; push the named variable.
    Var,
    /// String operand holding embedded code; push a function value.
    Fnc,
    /// Varint operand `n`; pop `n` operands into a source-tuple.
    Src,
    /// Varint operand `n`; pop `n` items into a list, coalescing map entries.
    Lst,
    /// Varint operand `n`; pop `n` key/value pairs into a map.
    Map,
    /// String operand; bind the name in the current frame.
    Set,
    /// Pop indexable and index; push the element.
    Get,
    /// Pop indexable, index, and value; store the element.
    Put,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    Neg,
    Eq,
    Neq,
    Gt,
    Lt,
    /// Varint offset; pop a condition, skip forward when falsy.
    If,
    /// Varint offset; unconditional relative jump.
    Jmp,
    /// Pop callee and argument tuple; invoke.
    Cal,
    /// Pop object and index; resolve the member and invoke it on the object.
    Met,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match byte {
            0 => Nil,
            1 => Int,
            2 => Bool,
            3 => Flt,
            4 => Str,
            5 => Var,
            6 => Fnc,
            7 => Src,
            8 => Lst,
            9 => Map,
            10 => Set,
            11 => Get,
            12 => Put,
            13 => Add,
            14 => Sub,
            15 => Mul,
            16 => Div,
            17 => And,
            18 => Or,
            19 => Not,
            20 => Neg,
            21 => Eq,
            22 => Neq,
            23 => Gt,
            24 => Lt,
            25 => If,
            26 => Jmp,
            27 => Cal,
            28 => Met,
            unknown => return Err(unknown),
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Opcode::*;
        let mnemonic = match self {
            Nil => "NIL",
            Int => "INT",
            Bool => "BUL",
            Flt => "FLT",
            Str => "STR",
            Var => "VAR",
            Fnc => "FNC",
            Src => "SRC",
            Lst => "LST",
            Map => "MAP",
            Set => "SET",
            Get => "GET",
            Put => "PUT",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            And => "AND",
            Or => "ORR",
            Not => "NOT",
            Neg => "NEG",
            Eq => "EQU",
            Neq => "NEQ",
            Gt => "GTN",
            Lt => "LTN",
            If => "IFF",
            Jmp => "JMP",
            Cal => "CAL",
            Met => "MET",
        };
        f.write_str(mnemonic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_opcodes() {
        for byte in 0..=28u8 {
            let op = Opcode::try_from(byte).unwrap();
            assert_eq!(byte, op as u8);
        }
    }

    #[test]
    fn test_unknown_opcode_is_rejected() {
        assert_eq!(Err(29), Opcode::try_from(29));
        assert_eq!(Err(255), Opcode::try_from(255));
    }
}
