//! Built-in member methods, dispatched when a `GET` with a string index
//! misses the map side-table. Simple queries answer directly; the rest
//! resolve to host-callback cells that follow the source-tuple calling
//! convention.

use crate::{serial::ByteReader, util};

use super::{Fault, Handle, Value, Vm};

pub(crate) fn builtin_method(
    vm: &mut Vm,
    indexable: Handle,
    name: &[u8],
) -> Result<Option<Handle>, Fault> {
    let method = match name {
        b"length" => {
            let length = match vm.heap().get(indexable) {
                Value::List { items, .. } => items.borrow().len(),
                Value::Str(bytes) => bytes.len(),
                _ => return Err(Fault::type_error("no length for non-indexable")),
            };
            vm.alloc(Value::Int(length as i32))
        }
        b"type" => {
            let type_name = vm.heap().get(indexable).type_tag().name();
            vm.alloc(Value::Str(type_name.as_bytes().to_vec()))
        }
        b"string" => {
            let text = vm.heap().value_text(indexable);
            vm.alloc(Value::Str(text))
        }
        b"list" => {
            // the positional elements without the side-table; the items
            // container stays shared
            let Value::List { items, .. } = vm.heap().get(indexable) else {
                return Err(Fault::type_error("list is only for lists"));
            };
            let items = items.clone();
            vm.alloc(Value::List { items, map: None })
        }
        b"keys" => {
            let Value::List { map, .. } = vm.heap().get(indexable) else {
                return Err(Fault::type_error("keys are only for lists"));
            };
            let keys: Vec<Vec<u8>> = map
                .as_ref()
                .map(|m| m.borrow().keys().cloned().collect())
                .unwrap_or_default();
            let handles: Vec<Handle> = keys
                .into_iter()
                .map(|key| vm.alloc(Value::Str(key)))
                .collect();
            vm.alloc(Value::list(handles))
        }
        b"values" => {
            let Value::List { map, .. } = vm.heap().get(indexable) else {
                return Err(Fault::type_error("values are only for lists"));
            };
            let values: Vec<Handle> = map
                .as_ref()
                .map(|m| m.borrow().values().copied().collect())
                .unwrap_or_default();
            vm.alloc(Value::list(values))
        }
        b"serialize" => vm.alloc(Value::Host(cfnc_serialize)),
        b"deserialize" => vm.alloc(Value::Host(cfnc_deserialize)),
        b"sort" => {
            if !matches!(vm.heap().get(indexable), Value::List { .. }) {
                return Err(Fault::type_error("sorting a non-list"));
            }
            vm.alloc(Value::Host(cfnc_sort))
        }
        b"char" => vm.alloc(Value::Host(cfnc_char)),
        b"has" => vm.alloc(Value::Host(cfnc_has)),
        b"find" => vm.alloc(Value::Host(cfnc_find)),
        b"part" => vm.alloc(Value::Host(cfnc_part)),
        b"remove" => vm.alloc(Value::Host(cfnc_remove)),
        b"insert" => vm.alloc(Value::Host(cfnc_insert)),
        b"replace" => vm.alloc(Value::Host(cfnc_replace)),
        _ => return Ok(None),
    };
    Ok(Some(method))
}

fn arg(args: &[Handle], index: usize) -> Result<Handle, Fault> {
    args.get(index)
        .copied()
        .ok_or_else(|| Fault::type_error("missing argument"))
}

fn int_arg(vm: &Vm, args: &[Handle], index: usize) -> Result<i32, Fault> {
    match vm.heap().get(arg(args, index)?) {
        Value::Int(n) => Ok(*n),
        _ => Err(Fault::type_error("non-integer index")),
    }
}

fn opt_int_arg(vm: &Vm, args: &[Handle], index: usize) -> Result<Option<i32>, Fault> {
    if index >= args.len() {
        return Ok(None);
    }
    int_arg(vm, args, index).map(Some)
}

fn str_arg(vm: &Vm, args: &[Handle], index: usize) -> Result<Vec<u8>, Fault> {
    match vm.heap().get(arg(args, index)?) {
        Value::Str(bytes) => Ok(bytes.clone()),
        _ => Err(Fault::type_error("expected a string argument")),
    }
}

/// `string.char(i)`: the byte at `i` as an integer.
fn cfnc_char(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let bytes = str_arg(vm, &args, 0)?;
    let index = int_arg(vm, &args, 1)?;
    if index < 0 || index as usize >= bytes.len() {
        return Err(Fault::bounds("index out of bounds"));
    }
    Ok(Some(vm.alloc(Value::Int(bytes[index as usize] as i32))))
}

/// `list.sort()` / `list.sort(comparator)`: in-place, stable insertion
/// sort. The comparator is a language function returning an integer whose
/// sign orders the pair; without one, only integers compare.
fn cfnc_sort(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let list = arg(&args, 0)?;
    let comparator = args.get(1).copied();

    let Value::List { items, .. } = vm.heap().get(list) else {
        return Err(Fault::type_error("sorting a non-list"));
    };
    let shared = items.clone();
    let mut items: Vec<Handle> = shared.borrow().clone();

    // the list and comparator must survive collections triggered by
    // comparator bodies
    vm.protect(list);
    if let Some(comparator) = comparator {
        vm.protect(comparator);
    }

    let outcome: Result<(), Fault> = (|| {
        for i in 1..items.len() {
            let mut j = i;
            while j > 0 && compare(vm, items[j - 1], items[j], comparator)? > 0 {
                items.swap(j - 1, j);
                j -= 1;
            }
        }
        Ok(())
    })();

    vm.unprotect(1 + comparator.is_some() as usize);
    outcome?;

    *shared.borrow_mut() = items;
    Ok(None)
}

fn compare(
    vm: &mut Vm,
    a: Handle,
    b: Handle,
    comparator: Option<Handle>,
) -> Result<i32, Fault> {
    match comparator {
        Some(comparator) => {
            vm.call_value(comparator, vec![a, b], None)?;
            let result = vm.pop()?;
            match vm.heap().get(result) {
                Value::Int(n) => Ok(*n),
                _ => Err(Fault::type_error("non-integer comparison result")),
            }
        }
        None => match (vm.heap().get(a), vm.heap().get(b)) {
            (Value::Int(m), Value::Int(n)) => Ok(match m.cmp(n) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }),
            _ => Err(Fault::type_error("incompatible types for comparison")),
        },
    }
}

fn cfnc_has(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    find2(vm, true)
}

fn cfnc_find(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    find2(vm, false)
}

/// `find` / `has` over strings (substring search), positional list
/// elements, and finally the map side-table.
fn find2(vm: &mut Vm, has: bool) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let this = arg(&args, 0)?;
    let sought = arg(&args, 1)?;

    let result = match (vm.heap().get(this).clone(), vm.heap().get(sought).clone()) {
        (Value::Str(haystack), Value::Str(needle)) => {
            let start = opt_int_arg(vm, &args, 2)?.unwrap_or(0);
            if start < 0 {
                return Err(Fault::bounds("index out of bounds"));
            }
            let found = util::find_subslice(&haystack, &needle, start as usize);
            Some(if has {
                vm.alloc(Value::Bool(found.is_some()))
            } else {
                vm.alloc(Value::Int(found.map(|at| at as i32).unwrap_or(-1)))
            })
        }
        (Value::List { items, .. }, _) => {
            let items = items.borrow().clone();
            let mut found = None;
            for item in items {
                if vm.heap().values_equal(item, sought)? {
                    found = Some(if has {
                        vm.alloc(Value::Bool(true))
                    } else {
                        item
                    });
                    break;
                }
            }
            found
        }
        _ => None,
    };

    // a miss falls through to the map side-table
    let result = match result {
        Some(found) => Some(found),
        None => {
            let from_map = match (vm.heap().get(this), vm.heap().get(sought)) {
                (Value::List { map: Some(map), .. }, Value::Str(name)) => {
                    map.borrow().get(name).copied()
                }
                _ => None,
            };
            match (from_map, has) {
                (Some(_), true) => Some(vm.alloc(Value::Bool(true))),
                (Some(found), false) => Some(found),
                (None, _) => None,
            }
        }
    };

    Ok(Some(match result {
        Some(found) => found,
        None => {
            if has {
                vm.alloc(Value::Bool(false))
            } else {
                vm.alloc(Value::Nil)
            }
        }
    }))
}

/// `x.part(start)` / `x.part(start, length)`: a fresh sub-string or
/// sub-list (elements shared).
fn cfnc_part(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let this = arg(&args, 0)?;
    let start = int_arg(vm, &args, 1)?;
    if start < 0 {
        return Err(Fault::bounds("index out of bounds"));
    }
    let start = start as usize;

    let value = match vm.heap().get(this).clone() {
        Value::Str(bytes) => {
            let length = opt_int_arg(vm, &args, 2)?
                .unwrap_or_else(|| (bytes.len().saturating_sub(start)) as i32);
            Value::Str(util::part(&bytes, start, length.max(0) as usize))
        }
        Value::List { items, .. } => {
            let items = items.borrow().clone();
            let length = opt_int_arg(vm, &args, 2)?
                .unwrap_or_else(|| (items.len().saturating_sub(start)) as i32);
            Value::list(util::part(&items, start, length.max(0) as usize))
        }
        _ => return Err(Fault::type_error("bad part type")),
    };
    Ok(Some(vm.alloc(value)))
}

/// `x.remove(start)` / `x.remove(start, length)`: a fresh value with the
/// range removed; the receiver is untouched.
fn cfnc_remove(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let this = arg(&args, 0)?;
    let start = int_arg(vm, &args, 1)?;
    if start < 0 {
        return Err(Fault::bounds("index out of bounds"));
    }
    let length = opt_int_arg(vm, &args, 2)?.unwrap_or(1).max(0) as usize;

    let value = match vm.heap().get(this).clone() {
        Value::Str(mut bytes) => {
            util::remove(&mut bytes, start as usize, length);
            Value::Str(bytes)
        }
        Value::List { items, .. } => {
            let mut items = items.borrow().clone();
            util::remove(&mut items, start as usize, length);
            Value::list(items)
        }
        _ => return Err(Fault::type_error("bad remove type")),
    };
    Ok(Some(vm.alloc(value)))
}

/// `x.insert(item)` / `x.insert(item, at)`: splice into the receiver in
/// place (default position 0) and yield it.
fn cfnc_insert(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let this = arg(&args, 0)?;
    let insertion = arg(&args, 1)?;
    let at = opt_int_arg(vm, &args, 2)?.unwrap_or(0);
    if at < 0 {
        return Err(Fault::bounds("index out of bounds"));
    }

    match vm.heap().get(this).clone() {
        Value::List { items, .. } => {
            util::insert(&mut items.borrow_mut(), at as usize, &[insertion]);
        }
        Value::Str(_) => {
            let Value::Str(addition) = vm.heap().get(insertion).clone() else {
                return Err(Fault::type_error("insertion does not match destination"));
            };
            let Value::Str(bytes) = vm.heap_mut().get_mut(this) else {
                unreachable!("receiver kind changed mid-instruction");
            };
            util::insert(bytes, at as usize, &addition);
        }
        _ => return Err(Fault::type_error("bad insertion destination")),
    }
    Ok(Some(this))
}

/// `s.replace(sought, with)` replaces every occurrence;
/// `s.replace(sought, with, start)` only the first one at or after
/// `start`; `s.replace(start, length, with)` splices a range.
fn cfnc_replace(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let this = arg(&args, 0)?;
    let Value::Str(bytes) = vm.heap().get(this).clone() else {
        return Err(Fault::type_error("replacing in a non-string"));
    };

    let replaced = match vm.heap().get(arg(&args, 1)?).clone() {
        Value::Str(sought) => {
            let with = str_arg(vm, &args, 2)?;
            match opt_int_arg(vm, &args, 3)? {
                Some(start) => {
                    if start < 0 {
                        return Err(Fault::bounds("index out of bounds"));
                    }
                    match util::find_subslice(&bytes, &sought, start as usize) {
                        Some(at) => util::replace_range(&bytes, at, sought.len(), &with),
                        None => bytes,
                    }
                }
                None => {
                    let mut out = bytes;
                    let mut from = 0;
                    while let Some(at) = util::find_subslice(&out, &sought, from) {
                        out = util::replace_range(&out, at, sought.len(), &with);
                        from = at + with.len().max(1);
                    }
                    out
                }
            }
        }
        Value::Int(start) => {
            if start < 0 {
                return Err(Fault::bounds("index out of bounds"));
            }
            let length = int_arg(vm, &args, 2)?.max(0);
            let with = str_arg(vm, &args, 3)?;
            util::replace_range(&bytes, start as usize, length as usize, &with)
        }
        _ => return Err(Fault::type_error("replacement is not a string")),
    };

    Ok(Some(vm.alloc(Value::Str(replaced))))
}

/// `v.serialize()`: the value's wire form as a string.
fn cfnc_serialize(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let this = arg(&args, 0)?;
    let mut bytes = Vec::new();
    vm.heap().serialize(this, &mut bytes)?;
    Ok(Some(vm.alloc(Value::Str(bytes))))
}

/// `s.deserialize()`: rebuild the value a serialize call produced.
fn cfnc_deserialize(vm: &mut Vm) -> Result<Option<Handle>, Fault> {
    let args = vm.pop_args()?;
    let bytes = str_arg(vm, &args, 0)?;
    let mut reader = ByteReader::new(&bytes);
    let value = vm.heap_mut().deserialize(&mut reader)?;
    Ok(Some(value))
}
