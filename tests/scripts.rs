//! End-to-end behavior: literal source in, printed output out.

mod common;

use common::{eval, run};
use lilt::vm::Value;

#[test]
fn test_arithmetic_precedence() {
    assert_eq!("7\n", run("sys.print(1 + 2 * 3)"));
}

#[test]
fn test_list_indexing() {
    assert_eq!("20\n", run("x = [10, 20, 30]; sys.print(x[1])"));
}

#[test]
fn test_list_length() {
    assert_eq!("3\n", run("x = [1,2,3]; sys.print(x.length)"));
}

#[test]
fn test_map_lookup() {
    assert_eq!("2\n", run("x = ['a':1, 'b':2]; sys.print(x['b'])"));
}

#[test]
fn test_function_call() {
    assert_eq!("7\n", run("f = function(a,b) return a+b end; sys.print(f(3,4))"));
}

#[test]
fn test_while_loop() {
    assert_eq!("3\n", run("i = 0; while i < 3 i = i + 1 end; sys.print(i)"));
}

#[test]
fn test_if_else() {
    assert_eq!("y\n", run("if 2 > 1 then sys.print('y') else sys.print('n') end"));
}

#[test]
fn test_string_indexing_yields_single_character() {
    assert_eq!("b\n", run("s = 'abc'; sys.print(s[1])"));
}

#[test]
fn test_string_methods() {
    assert_eq!("2\n", run("sys.print('abcd'.find('cd'))"));
    assert_eq!("true\n", run("sys.print('abcd'.has('bc'))"));
    assert_eq!("false\n", run("sys.print('abcd'.has('xy'))"));
    assert_eq!("bc\n", run("sys.print('abcd'.part(1, 2))"));
    assert_eq!("cd\n", run("sys.print('abcd'.part(2))"));
    assert_eq!("acd\n", run("sys.print('abcd'.remove(1))"));
    assert_eq!("axxd\n", run("sys.print('abcd'.replace('bc', 'xx'))"));
    assert_eq!("97\n", run("sys.print('abc'.char(0))"));
    assert_eq!("5\n", run("sys.print('hello'.length)"));
}

#[test]
fn test_replace_all_occurrences() {
    assert_eq!("x.x.x\n", run("sys.print('a.a.a'.replace('a', 'x'))"));
}

#[test]
fn test_insert_mutates_receiver() {
    assert_eq!("[9,1,2]\n", run("x = [1, 2]; x.insert(9); sys.print(x)"));
}

#[test]
fn test_type_names() {
    assert_eq!(
        "integer\nfloat\nstring\nlist\nboolean\nfunction\n",
        run("sys.print((1).type) sys.print((1.5).type) sys.print('a'.type) \
             sys.print([].type) sys.print(true.type) sys.print((function() end).type)")
    );
}

#[test]
fn test_keys_and_values() {
    assert_eq!(
        "['z','a']\n[1,2]\n",
        run("x = ['z':1, 'a':2]; sys.print(x.keys); sys.print(x.values)")
    );
}

#[test]
fn test_sort_in_place() {
    assert_eq!("[1,2,5,9]\n", run("x = [5, 1, 9, 2]; x.sort(); sys.print(x)"));
}

#[test]
fn test_sort_with_comparator() {
    let source = "x = [5, 1, 9, 2]; x.sort(function(a, b) return b - a end); sys.print(x)";
    assert_eq!("[9,5,2,1]\n", run(source));
}

#[test]
fn test_serialize_round_trip_in_language() {
    let source = "x = [1, 2.5, 'hi', 'k':[3]]; y = x.serialize().deserialize(); \
                  sys.print(x == y); sys.print(y[2]); sys.print(y.k[0])";
    assert_eq!("true\nhi\n3\n", run(source));
}

#[test]
fn test_list_concatenation_merges_side_tables() {
    let source = "x = [1, 'a':2] + [3, 'b':4]; sys.print(x)";
    assert_eq!("[1,3,'a':2,'b':4]\n", run(source));
}

#[test]
fn test_list_concatenation_keeps_left_entry_on_key_collision() {
    let source = "x = [1, 'a':1] + [2, 'a':9, 'b':4]; sys.print(x.a); sys.print(x.b)";
    assert_eq!("1\n4\n", run(source));
}

#[test]
fn test_atoi_multi_value_flattens_into_call_arguments() {
    // atoi yields (number, bytes consumed); the tuple flattens into the
    // print call, so both land on their own line
    assert_eq!("-42\n3\n", run("sys.print(sys.atoi('-42x'))"));
}

#[test]
fn test_atoi_tuple_collapses_to_first_value_on_assignment() {
    assert_eq!("-42\n", run("n = sys.atoi('-42x'); sys.print(n)"));
}

#[test]
fn test_closure_capture_is_late_bound() {
    let source = "make = function() x = 1; f = function() return x end; x = 2; return f end; \
                  g = make(); sys.print(g())";
    assert_eq!("2\n", run(source));
}

#[test]
fn test_nested_function_calls() {
    let source = "twice = function(n) return n * 2 end; \
                  sys.print(twice(twice(twice(1))))";
    assert_eq!("8\n", run(source));
}

#[test]
fn test_float_arithmetic() {
    assert_eq!("4\n", run("sys.print(1.5 + 2.5)"));
    assert_eq!("0.5\n", run("sys.print(1 / 2.0)"));
}

#[test]
fn test_string_equality_is_bytewise() {
    assert_eq!("true\nfalse\n", run("sys.print('ab' == 'ab'); sys.print('ab' == 'ac')"));
}

#[test]
fn test_gc_keeps_reachable_cycle_intact() {
    let source = "x = [1, 2]; x['me'] = x; i = 0; \
                  while i < 2000 t = [i, i, i]; i = i + 1 end; \
                  sys.print(x['me'][1])";
    assert_eq!("2\n", run(source));
}

#[test]
fn test_runtime_trap_becomes_error_value() {
    let (vm, _, result) = eval("x = [1]; sys.print(x[5])");
    assert!(matches!(vm.heap().get(result), Value::Err(_)));
}

#[test]
fn test_host_error_surfaces_as_error_value() {
    let (vm, _, result) = eval("sys.print(sys.read('surely-does-not-exist.bin'))");
    let Value::Err(message) = vm.heap().get(result) else {
        panic!("expected an error value");
    };
    let message = String::from_utf8_lossy(message);
    assert!(message.contains("could not load file"), "got: {message}");
}

#[test]
fn test_interpret_from_inside_the_language() {
    assert_eq!("5\n", run("sys.interpret('sys.print(2 + 3)')"));
}
