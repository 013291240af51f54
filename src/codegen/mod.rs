//! Post-order bytecode emission over the parse tree.
//!
//! Forward jumps out of `if`/`else if` arms and the back-jump of a loop are
//! encoded as fixed-width padded varints, so patching an offset after the
//! block is laid out never changes any instruction's length.

use log::debug;

use crate::{
    bytecode::Opcode,
    parser::{Ast, BinaryVerb, UnaryVerb},
    serial,
};

/// Size of a patched jump instruction: one opcode byte plus the padded
/// varint operand.
const JMP_SITE_LEN: usize = 1 + serial::PADDED_INT_LEN;

/// Compile a parse tree into a complete program:
/// `<varint code length> <code bytes>`.
pub fn generate(root: &Ast) -> Vec<u8> {
    let code = generate_code(root);
    let mut program = Vec::with_capacity(code.len() + 4);
    serial::encode_int(&mut program, code.len() as i32);
    program.extend_from_slice(&code);
    debug!("generated {} bytes of code", code.len());
    program
}

/// Emit the bytecode of a single node.
pub fn generate_code(root: &Ast) -> Vec<u8> {
    let mut code = Vec::new();
    emit(root, &mut code);
    code
}

fn emit(root: &Ast, code: &mut Vec<u8>) {
    match root {
        Ast::Statements(statements) => {
            for statement in statements {
                emit(statement, code);
            }
        }
        Ast::Assignment { target, value } => {
            emit(value, code);
            emit(target, code);
        }
        Ast::Integer(value) => {
            code.push(Opcode::Int as u8);
            serial::encode_int(code, *value);
        }
        Ast::Boolean(value) => {
            code.push(Opcode::Bool as u8);
            serial::encode_int(code, *value as i32);
        }
        Ast::Float(value) => {
            code.push(Opcode::Flt as u8);
            serial::encode_float(code, *value);
        }
        Ast::Str(bytes) => {
            code.push(Opcode::Str as u8);
            serial::encode_string(code, bytes);
        }
        Ast::Variable { name, is_lhs } => {
            code.push(if *is_lhs { Opcode::Set } else { Opcode::Var } as u8);
            serial::encode_string(code, name);
        }
        Ast::Binary { verb, lhs, rhs } => {
            emit(lhs, code);
            emit(rhs, code);
            code.push(binary_opcode(*verb) as u8);
        }
        Ast::Unary { verb, operand } => {
            emit(operand, code);
            code.push(match verb {
                UnaryVerb::Negate => Opcode::Neg,
                UnaryVerb::Not => Opcode::Not,
            } as u8);
        }
        Ast::Table(elements) => {
            for element in elements {
                emit(element, code);
            }
            code.push(Opcode::Lst as u8);
            serial::encode_int(code, elements.len() as i32);
        }
        Ast::Pair { key, value } => {
            emit(key, code);
            emit(value, code);
            code.push(Opcode::Map as u8);
            serial::encode_int(code, 1);
        }
        Ast::Member {
            object,
            index,
            is_lhs,
        } => {
            emit(index, code);
            emit(object, code);
            code.push(if *is_lhs { Opcode::Put } else { Opcode::Get } as u8);
        }
        Ast::Fcall { callee, args } => {
            for arg in args {
                emit(arg, code);
            }
            code.push(Opcode::Src as u8);
            serial::encode_int(code, args.len() as i32);

            // A member-access callee dispatches through MET so the VM can
            // stage the receiver; everything else is a plain CAL.
            match callee.as_ref() {
                Ast::Member {
                    object,
                    index,
                    is_lhs: false,
                } => {
                    emit(index, code);
                    emit(object, code);
                    code.push(Opcode::Met as u8);
                }
                callee => {
                    emit(callee, code);
                    code.push(Opcode::Cal as u8);
                }
            }
        }
        Ast::Fdecl { params, body } => {
            let mut inner = Vec::new();
            for param in params.iter().rev() {
                inner.push(Opcode::Set as u8);
                serial::encode_string(&mut inner, param);
            }
            emit(body, &mut inner);

            code.push(Opcode::Fnc as u8);
            serial::encode_string(code, &inner);
        }
        Ast::IfThenElse { arms, otherwise } => {
            emit_ifthenelse(arms, otherwise.as_deref(), code);
        }
        Ast::Loop { condition, body } => {
            emit_loop(condition, body, code);
        }
        Ast::Return(value) => {
            // Returns carry no opcode of their own; the value propagates
            // through the call boundary when the body's code ends.
            emit(value, code);
        }
    }
}

fn binary_opcode(verb: BinaryVerb) -> Opcode {
    match verb {
        BinaryVerb::Plus => Opcode::Add,
        BinaryVerb::Minus => Opcode::Sub,
        BinaryVerb::Times => Opcode::Mul,
        BinaryVerb::Divide => Opcode::Div,
        BinaryVerb::Same => Opcode::Eq,
        BinaryVerb::Different => Opcode::Neq,
        BinaryVerb::GreaterThan => Opcode::Gt,
        BinaryVerb::LessThan => Opcode::Lt,
    }
}

/// Layout per arm: `<cond> IF <skip> <then> JMP <to end>`; the final `else`
/// block is appended verbatim. The forward jumps are emitted as
/// placeholders and patched once the chain's total size is known.
fn emit_ifthenelse(arms: &[(Ast, Ast)], otherwise: Option<&Ast>, code: &mut Vec<u8>) {
    let mut patch_sites = vec![];

    for (condition, block) in arms {
        let mut then_code = generate_code(block);
        then_code.push(Opcode::Jmp as u8);
        let site_in_block = then_code.len();
        serial::encode_int_padded(&mut then_code, 0);

        emit(condition, code);
        code.push(Opcode::If as u8);
        serial::encode_int(code, then_code.len() as i32);
        patch_sites.push(code.len() + site_in_block);
        code.extend_from_slice(&then_code);
    }

    if let Some(block) = otherwise {
        emit(block, code);
    }

    for site in patch_sites {
        let offset = (code.len() - (site + serial::PADDED_INT_LEN)) as i32;
        let mut patched = Vec::with_capacity(serial::PADDED_INT_LEN);
        serial::encode_int_padded(&mut patched, offset);
        code[site..site + serial::PADDED_INT_LEN].copy_from_slice(&patched);
    }
}

/// `<cond> IF <len body + back-jump> <body> JMP -(total length)`.
fn emit_loop(condition: &Ast, body: &Ast, code: &mut Vec<u8>) {
    let start = code.len();
    let body_code = generate_code(body);

    emit(condition, code);
    code.push(Opcode::If as u8);
    serial::encode_int(code, (body_code.len() + JMP_SITE_LEN) as i32);
    code.extend_from_slice(&body_code);

    code.push(Opcode::Jmp as u8);
    let total = code.len() + serial::PADDED_INT_LEN - start;
    serial::encode_int_padded(code, -(total as i32));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lexer, parser, serial::ByteReader};
    use std::path::PathBuf;

    fn compile(input: &str) -> Vec<u8> {
        let tokens = lexer::lex(input.as_bytes(), &PathBuf::from(".")).unwrap();
        let ast = parser::parse(tokens).unwrap();
        generate(&ast)
    }

    fn unwrap_program(program: &[u8]) -> Vec<u8> {
        let mut reader = ByteReader::new(program);
        let code = serial::decode_string(&mut reader).unwrap();
        assert!(reader.at_end());
        code
    }

    #[test]
    fn test_generate_is_deterministic() {
        let source = "x = [1, 'a':2] if x.length > 1 then sys.print(x) end";
        assert_eq!(compile(source), compile(source));
    }

    #[test]
    fn test_generate_wraps_code_in_length_frame() {
        let program = compile("x = 1");
        let code = unwrap_program(&program);
        assert!(!code.is_empty());
    }

    #[test]
    fn test_generate_integer_literal() {
        let code = unwrap_program(&compile("x = 7"));
        // INT 7, SET "x"
        assert_eq!(
            vec![
                Opcode::Int as u8,
                7,
                Opcode::Set as u8,
                1,
                b'x',
            ],
            code
        );
    }

    #[test]
    fn test_generate_assignment_emits_rhs_before_lhs() {
        let code = unwrap_program(&compile("x = y"));
        assert_eq!(Opcode::Var as u8, code[0]);
        assert_eq!(Opcode::Set as u8, code[3]);
    }

    #[test]
    fn test_generate_true_emits_bool_one() {
        let code = unwrap_program(&compile("x = true"));
        assert_eq!(vec![Opcode::Bool as u8, 1, Opcode::Set as u8, 1, b'x'], code);
    }

    #[test]
    fn test_generate_call_builds_source_tuple() {
        let code = unwrap_program(&compile("f(1, 2)"));
        // INT 1, INT 2, SRC 2, VAR "f", CAL
        assert_eq!(
            vec![
                Opcode::Int as u8,
                1,
                Opcode::Int as u8,
                2,
                Opcode::Src as u8,
                2,
                Opcode::Var as u8,
                1,
                b'f',
                Opcode::Cal as u8,
            ],
            code
        );
    }

    #[test]
    fn test_generate_method_call_uses_met() {
        let code = unwrap_program(&compile("sys.print(1)"));
        assert_eq!(Some(&(Opcode::Met as u8)), code.last());
    }

    #[test]
    fn test_generate_member_write_uses_put() {
        let code = unwrap_program(&compile("x[0] = 1"));
        assert_eq!(Some(&(Opcode::Put as u8)), code.last());
    }

    #[test]
    fn test_generate_fdecl_sets_params_right_to_left() {
        let code = unwrap_program(&compile("f = function(a, b) return a end"));
        assert_eq!(Opcode::Fnc as u8, code[0]);
        let mut reader = ByteReader::new(&code[1..]);
        let body = serial::decode_string(&mut reader).unwrap();
        // SET "b", SET "a", VAR "a"
        assert_eq!(
            vec![
                Opcode::Set as u8,
                1,
                b'b',
                Opcode::Set as u8,
                1,
                b'a',
                Opcode::Var as u8,
                1,
                b'a',
            ],
            body
        );
    }

    #[test]
    fn test_generate_loop_layout() {
        let code = unwrap_program(&compile("while 0 f() end"));
        // BOOL-free layout: INT 0, IF <skip>, body, JMP <back>
        assert_eq!(Opcode::Int as u8, code[0]);
        assert_eq!(Opcode::If as u8, code[2]);
        let body_skip = code[3] as usize;
        // the IF offset must land exactly past the back-jump
        assert_eq!(code.len(), 4 + body_skip);
        // back-jump returns to the loop start
        let jmp_at = code.len() - JMP_SITE_LEN;
        assert_eq!(Opcode::Jmp as u8, code[jmp_at]);
        let mut reader = ByteReader::new(&code[jmp_at + 1..]);
        let offset = serial::decode_int(&mut reader).unwrap();
        assert_eq!(-(code.len() as i32), offset);
    }

    #[test]
    fn test_generate_if_patches_forward_jump() {
        let code = unwrap_program(&compile("if 1 then x = 2 else x = 3 end"));
        // INT 1, IF <skip>, then-block, JMP <to end>, else-block
        assert_eq!(Opcode::If as u8, code[2]);
        let skip = code[3] as usize;
        let jmp_at = 4 + skip - JMP_SITE_LEN;
        assert_eq!(Opcode::Jmp as u8, code[jmp_at]);
        let mut reader = ByteReader::new(&code[jmp_at + 1..]);
        let offset = serial::decode_int(&mut reader).unwrap() as usize;
        // jumping from past the operand must land at the end of the chain
        assert_eq!(code.len(), jmp_at + 1 + serial::PADDED_INT_LEN + offset);
    }

    #[test]
    fn test_generate_pair_emits_key_value_map() {
        let code = unwrap_program(&compile("x = ['a':1]"));
        // STR "a", INT 1, MAP 1, LST 1, SET "x"
        assert_eq!(
            vec![
                Opcode::Str as u8,
                1,
                b'a',
                Opcode::Int as u8,
                1,
                Opcode::Map as u8,
                1,
                Opcode::Lst as u8,
                1,
                Opcode::Set as u8,
                1,
                b'x',
            ],
            code
        );
    }
}
